use anyhow::{anyhow, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, path::Path, sync::Arc};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

mod api;
mod app;
mod config;
mod error;
mod export;
mod generation;
mod lifecycle;
mod player;
mod registry;
mod resources;
mod session;
mod state;
#[cfg(test)]
mod testing;
mod types;
mod ui;

use app::{AppCommand, AppEvent, AppState};
use config::AppConfig;
use error::SessionError;
use player::PlayerHandle;
use session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    info!("starting studio CLI");

    let config = AppConfig::load()?;
    let client =
        api::Client::new(config.backend_url(), config.response_shape(), config.audio_format())?;
    info!("backend at {}; exports to {}", client.base_url(), config.export_dir().display());

    let session = Arc::new(Session::new(Arc::new(client), config.session_options()));
    let mut updates = session.subscribe();
    let player = player::spawn()?;

    let (event_tx, mut event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();

    let controller = Controller::new(session.clone(), player.clone(), event_tx);
    controller.bootstrap(config.default_model_id().map(str::to_string));
    controller.spawn(command_rx);

    let mut app_state = AppState::new();

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    enable_raw_mode()?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let ui_result = ui::run(&mut terminal, &mut app_state, &mut updates, &mut event_rx, command_tx);

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;

    if let Err(err) = player.stop() {
        error!("failed to stop playback: {err}");
    }
    session.close().await;
    ui_result
}

fn setup_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}

/// Turns terminal commands into session intents. Each command runs on its own
/// task so a slow backend call never blocks a newer intent.
struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    session: Arc<Session<api::Client>>,
    player: PlayerHandle,
    event_tx: UnboundedSender<AppEvent>,
}

impl Controller {
    fn new(
        session: Arc<Session<api::Client>>,
        player: PlayerHandle,
        event_tx: UnboundedSender<AppEvent>,
    ) -> Self {
        Self { inner: Arc::new(ControllerInner { session, player, event_tx }) }
    }

    /// Fetches the registry and, when configured, loads the default model.
    fn bootstrap(&self, default_model: Option<String>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.session.refresh_models().await;
            let Some(id) = default_model else {
                return;
            };
            let known = inner.session.snapshot().models.iter().any(|model| model.id == id);
            if known {
                inner.session.select_model(&id).await;
            } else {
                let message = format!("Default model {id} is not offered by the backend");
                let _ = inner.event_tx.send(AppEvent::Info(message));
            }
        });
    }

    fn spawn(self, mut command_rx: UnboundedReceiver<AppCommand>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(err) = Controller::handle_command(inner.clone(), command).await {
                        error!("command error: {err}");
                        let _ = inner.event_tx.send(AppEvent::Error(format!("{err}")));
                    }
                });
            }
        });
    }

    async fn handle_command(inner: Arc<ControllerInner>, command: AppCommand) -> Result<()> {
        let session = &inner.session;
        match command {
            AppCommand::RefreshModels => session.refresh_models().await,
            AppCommand::SelectModel(id) => session.select_model(&id).await,
            AppCommand::SetPrompt(field) => session.set_prompt_field(field).await,
            AppCommand::SetMode(mode) => session.set_mode(mode).await,
            AppCommand::Generate => session.generate().await,
            AppCommand::Extend(track_id) => session.extend(&track_id).await,
            AppCommand::Upload(path) => Controller::upload(&inner, &path).await,
            AppCommand::ClearUpload => session.clear_upload().await,
            AppCommand::SelectTrack(track_id) => session.select_track(&track_id).await,
            AppCommand::PlayTrack(track_id) => {
                session.select_track(&track_id).await;
                match session.track_audio(&track_id).await {
                    Some((label, bytes)) => Controller::play(&inner, label, bytes)?,
                    None => {
                        let _ = inner
                            .event_tx
                            .send(AppEvent::Error(format!("No audio for track {track_id}")));
                    }
                }
            }
            AppCommand::PlayUpload => {
                if let Some((label, bytes)) = session.upload_audio().await {
                    Controller::play(&inner, label, bytes)?;
                }
            }
            AppCommand::StopPlayback => {
                inner.player.stop()?;
                let _ = inner.event_tx.send(AppEvent::PlaybackStopped);
            }
            AppCommand::Export(track_id) => session.export_track(&track_id).await,
        }
        Ok(())
    }

    async fn upload(inner: &ControllerInner, path: &Path) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        match tokio::fs::read(path).await {
            Ok(bytes) => inner.session.upload_file(&name, bytes).await,
            Err(err) => {
                let reason = format!("cannot read {}: {err}", path.display());
                inner.session.report(SessionError::UploadFailed(reason)).await;
            }
        }
    }

    fn play(inner: &ControllerInner, label: String, bytes: Arc<[u8]>) -> Result<()> {
        inner.player.play(label.clone(), bytes)?;
        let _ = inner.event_tx.send(AppEvent::PlaybackStarted { label });
        Ok(())
    }
}
