use crossterm::event::KeyCode;
use std::path::PathBuf;

use crate::error::SessionError;
use crate::state::{Busy, PromptField, SessionState};
use crate::types::GenerationMode;

const MAX_STATUS_LINES: usize = 8;
const DURATION_STEPS: &[Option<u32>] = &[None, Some(15), Some(30), Some(60)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    Models,
    #[default]
    Content,
    Style,
    Upload,
    History,
}

impl Focus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Models => "Models",
            Self::Content => "Prompt",
            Self::Style => "Style",
            Self::Upload => "Upload",
            Self::History => "History",
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Models => Self::Content,
            Self::Content => Self::Style,
            Self::Style => Self::Upload,
            Self::Upload => Self::History,
            Self::History => Self::Models,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Models => Self::History,
            Self::Content => Self::Models,
            Self::Style => Self::Content,
            Self::Upload => Self::Style,
            Self::History => Self::Upload,
        }
    }

    fn is_text(self) -> bool {
        matches!(self, Self::Content | Self::Style | Self::Upload)
    }
}

/// Intents sent from the terminal to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    RefreshModels,
    SelectModel(String),
    SetPrompt(PromptField),
    SetMode(GenerationMode),
    Generate,
    Extend(String),
    Upload(PathBuf),
    ClearUpload,
    SelectTrack(String),
    PlayTrack(String),
    PlayUpload,
    StopPlayback,
    Export(String),
}

/// Notices from the controller that are not part of the session state.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Info(String),
    Error(String),
    PlaybackStarted { label: String },
    PlaybackStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    Command(AppCommand),
    Redraw,
    Ignored,
    Quit,
}

#[derive(Debug, Default)]
pub struct AppState {
    pub focus: Focus,
    pub content: String,
    pub style: String,
    pub upload_path: String,
    pub model_cursor: usize,
    pub track_cursor: Option<String>,
    pub status_lines: Vec<String>,
    pub now_playing: Option<String>,
    seen_error: Option<SessionError>,
    seen_export: Option<PathBuf>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Info(message) => self.push_status_line(message),
            AppEvent::Error(message) => self.push_status_line(format!("Error: {message}")),
            AppEvent::PlaybackStarted { label } => {
                self.push_status_line(format!("Playing {label}"));
                self.now_playing = Some(label);
            }
            AppEvent::PlaybackStopped => {
                if self.now_playing.take().is_some() {
                    self.push_status_line("Playback stopped".into());
                }
            }
        }
    }

    /// Reconciles local cursors and the status log with a new session snapshot.
    pub fn observe(&mut self, state: &SessionState) {
        if state.last_error != self.seen_error {
            if let Some(err) = state.last_error.as_ref().filter(|err| err.is_user_visible()) {
                self.push_status_line(format!("Error: {err}"));
            }
            self.seen_error = state.last_error.clone();
        }
        if state.last_export != self.seen_export {
            if let Some(path) = &state.last_export {
                self.push_status_line(format!("Exported to {}", path.display()));
            }
            self.seen_export = state.last_export.clone();
        }

        let cursor_valid =
            self.track_cursor.as_deref().is_some_and(|id| state.history.contains(id));
        if !cursor_valid {
            self.track_cursor = state.current_track.clone();
        }
        if self.model_cursor >= state.models.len() {
            self.model_cursor = state.models.len().saturating_sub(1);
        }
    }

    pub fn push_status_line(&mut self, line: String) {
        self.status_lines.push(line);
        if self.status_lines.len() > MAX_STATUS_LINES {
            let overflow = self.status_lines.len() - MAX_STATUS_LINES;
            self.status_lines.drain(0..overflow);
        }
    }

    pub fn on_key(&mut self, code: KeyCode, state: &SessionState) -> KeyOutcome {
        match code {
            KeyCode::Esc => return KeyOutcome::Quit,
            KeyCode::Tab => {
                self.focus = self.focus.next();
                return KeyOutcome::Redraw;
            }
            KeyCode::BackTab => {
                self.focus = self.focus.previous();
                return KeyOutcome::Redraw;
            }
            KeyCode::F(2) => {
                let vocals = !state.prompt.has_vocals;
                return command(AppCommand::SetPrompt(PromptField::Vocals(vocals)));
            }
            KeyCode::F(3) => return command(AppCommand::SetMode(state.mode.next())),
            KeyCode::F(4) => {
                let hint = next_duration(state.prompt.duration_hint);
                return command(AppCommand::SetPrompt(PromptField::Duration(hint)));
            }
            KeyCode::F(5) => return command(AppCommand::RefreshModels),
            _ => {}
        }
        if self.focus.is_text() {
            self.on_text_key(code)
        } else {
            self.on_list_key(code, state)
        }
    }

    fn on_text_key(&mut self, code: KeyCode) -> KeyOutcome {
        match code {
            KeyCode::Char(c) => {
                self.focused_buffer().push(c);
                self.buffer_changed()
            }
            KeyCode::Backspace => {
                if self.focused_buffer().pop().is_none() {
                    return KeyOutcome::Ignored;
                }
                self.buffer_changed()
            }
            KeyCode::Enter if self.focus == Focus::Upload => {
                let path = self.upload_path.trim();
                if path.is_empty() {
                    return command(AppCommand::ClearUpload);
                }
                command(AppCommand::Upload(PathBuf::from(path)))
            }
            KeyCode::Enter => command(AppCommand::Generate),
            _ => KeyOutcome::Ignored,
        }
    }

    fn on_list_key(&mut self, code: KeyCode, state: &SessionState) -> KeyOutcome {
        let track = self.track_cursor.clone();
        match (self.focus, code) {
            (Focus::Models, KeyCode::Up) => {
                self.model_cursor = self.model_cursor.saturating_sub(1);
                KeyOutcome::Redraw
            }
            (Focus::Models, KeyCode::Down) => {
                if self.model_cursor + 1 < state.models.len() {
                    self.model_cursor += 1;
                }
                KeyOutcome::Redraw
            }
            (Focus::Models, KeyCode::Enter) => match state.models.get(self.model_cursor) {
                Some(model) => command(AppCommand::SelectModel(model.id.clone())),
                None => KeyOutcome::Ignored,
            },
            (Focus::History, KeyCode::Up) => self.move_track_cursor(state, false),
            (Focus::History, KeyCode::Down) => self.move_track_cursor(state, true),
            (Focus::History, KeyCode::Enter) => match track {
                Some(id) => command(AppCommand::SelectTrack(id)),
                None => KeyOutcome::Ignored,
            },
            (_, KeyCode::Char('p')) => match (self.focus, track) {
                (Focus::History, Some(id)) => command(AppCommand::PlayTrack(id)),
                _ => match state.current_track.clone() {
                    Some(id) => command(AppCommand::PlayTrack(id)),
                    None => KeyOutcome::Ignored,
                },
            },
            (_, KeyCode::Char('u')) if state.uploaded_file.is_some() => {
                command(AppCommand::PlayUpload)
            }
            (_, KeyCode::Char('s')) => command(AppCommand::StopPlayback),
            (Focus::History, KeyCode::Char('e')) => match track {
                Some(id) => command(AppCommand::Extend(id)),
                None => KeyOutcome::Ignored,
            },
            (Focus::History, KeyCode::Char('x')) => match track {
                Some(id) => command(AppCommand::Export(id)),
                None => KeyOutcome::Ignored,
            },
            _ => KeyOutcome::Ignored,
        }
    }

    /// History is listed newest first, so "down" walks towards older tracks.
    fn move_track_cursor(&mut self, state: &SessionState, older: bool) -> KeyOutcome {
        let ids: Vec<&str> = state.history.newest_first().map(|track| track.id.as_str()).collect();
        if ids.is_empty() {
            return KeyOutcome::Ignored;
        }
        let index = self
            .track_cursor
            .as_deref()
            .and_then(|id| ids.iter().position(|candidate| *candidate == id));
        let next = match (index, older) {
            (None, _) => 0,
            (Some(index), true) => (index + 1).min(ids.len() - 1),
            (Some(index), false) => index.saturating_sub(1),
        };
        self.track_cursor = Some(ids[next].to_string());
        KeyOutcome::Redraw
    }

    fn focused_buffer(&mut self) -> &mut String {
        match self.focus {
            Focus::Style => &mut self.style,
            Focus::Upload => &mut self.upload_path,
            _ => &mut self.content,
        }
    }

    fn buffer_changed(&self) -> KeyOutcome {
        match self.focus {
            Focus::Content => {
                command(AppCommand::SetPrompt(PromptField::Content(self.content.clone())))
            }
            Focus::Style => command(AppCommand::SetPrompt(PromptField::Style(self.style.clone()))),
            _ => KeyOutcome::Redraw,
        }
    }
}

fn command(command: AppCommand) -> KeyOutcome {
    KeyOutcome::Command(command)
}

fn next_duration(current: Option<u32>) -> Option<u32> {
    let index = DURATION_STEPS.iter().position(|step| *step == current).unwrap_or(0);
    DURATION_STEPS[(index + 1) % DURATION_STEPS.len()]
}

/// One-line summary for the header.
pub fn status_summary(state: &SessionState) -> String {
    let model = match (state.selected(), &state.pending_model) {
        (_, Some(pending)) => format!("loading {pending}"),
        (Some(active), None) => active.name.clone(),
        (None, None) => "no model".to_string(),
    };
    let mut parts = vec![model, state.mode.label().to_string()];
    if state.prompt.has_vocals {
        parts.push("vocals".into());
    }
    if let Some(seconds) = state.prompt.duration_hint {
        parts.push(format!("{seconds}s"));
    }
    if let Some(file) = &state.uploaded_file {
        parts.push(format!("source {}", file.name));
    }
    if state.busy != Busy::Idle {
        parts.push(format!("{}…", state.busy.label()));
    }
    parts.join(" · ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Model;
    use crate::resources::{AudioSource, ResourcePool};
    use crate::state::Track;
    use chrono::Utc;
    use std::sync::Arc;

    fn state_with_tracks(ids: &[&str]) -> SessionState {
        let mut pool = ResourcePool::new();
        let mut state = SessionState::default();
        for id in ids {
            state.history.push(Track {
                id: id.to_string(),
                name: format!("track {id}"),
                model: "m1".into(),
                duration_seconds: None,
                has_vocals: false,
                content_prompt: String::new(),
                style_prompt: String::new(),
                created_at: Utc::now(),
                audio: pool.acquire(AudioSource::Generated(Arc::from(&b"x"[..]))),
            });
        }
        state.current_track = ids.last().map(|id| id.to_string());
        state
    }

    #[test]
    fn typing_updates_the_prompt() {
        let mut app = AppState::new();
        let state = SessionState::default();
        app.on_key(KeyCode::Char('l'), &state);
        let outcome = app.on_key(KeyCode::Char('o'), &state);
        assert_eq!(
            outcome,
            KeyOutcome::Command(AppCommand::SetPrompt(PromptField::Content("lo".into())))
        );
        assert_eq!(app.on_key(KeyCode::Enter, &state), KeyOutcome::Command(AppCommand::Generate));
    }

    #[test]
    fn upload_field_submits_a_path() {
        let mut app = AppState { focus: Focus::Upload, ..AppState::default() };
        let state = SessionState::default();
        assert_eq!(app.on_key(KeyCode::Enter, &state), KeyOutcome::Command(AppCommand::ClearUpload));
        for c in "a.wav".chars() {
            assert_eq!(app.on_key(KeyCode::Char(c), &state), KeyOutcome::Redraw);
        }
        assert_eq!(
            app.on_key(KeyCode::Enter, &state),
            KeyOutcome::Command(AppCommand::Upload(PathBuf::from("a.wav")))
        );
    }

    #[test]
    fn history_keys_target_the_cursor() {
        let state = state_with_tracks(&["t1", "t2"]);
        let mut app = AppState { focus: Focus::History, ..AppState::default() };
        app.observe(&state);
        assert_eq!(app.track_cursor.as_deref(), Some("t2"));

        app.on_key(KeyCode::Down, &state);
        assert_eq!(app.track_cursor.as_deref(), Some("t1"));
        assert_eq!(
            app.on_key(KeyCode::Char('e'), &state),
            KeyOutcome::Command(AppCommand::Extend("t1".into()))
        );
        assert_eq!(
            app.on_key(KeyCode::Char('x'), &state),
            KeyOutcome::Command(AppCommand::Export("t1".into()))
        );
    }

    #[test]
    fn models_enter_selects_highlighted_model() {
        let mut state = SessionState::default();
        state.models = ["m1", "m2"]
            .iter()
            .map(|id| Model {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                loaded: false,
            })
            .collect();
        let mut app = AppState { focus: Focus::Models, ..AppState::default() };
        app.on_key(KeyCode::Down, &state);
        app.on_key(KeyCode::Down, &state);
        assert_eq!(
            app.on_key(KeyCode::Enter, &state),
            KeyOutcome::Command(AppCommand::SelectModel("m2".into()))
        );
    }

    #[test]
    fn errors_are_logged_once() {
        let mut app = AppState::new();
        let mut state = SessionState {
            last_error: Some(SessionError::GenerationFailed("boom".into())),
            ..SessionState::default()
        };
        app.observe(&state);
        app.observe(&state);
        assert_eq!(app.status_lines, ["Error: generation failed: boom"]);

        state.last_error = Some(SessionError::StaleResponseDiscarded("load"));
        app.observe(&state);
        assert_eq!(app.status_lines.len(), 1);
    }

    #[test]
    fn duration_hint_cycles() {
        assert_eq!(next_duration(None), Some(15));
        assert_eq!(next_duration(Some(60)), None);
        assert_eq!(next_duration(Some(7)), Some(15));
    }

    #[test]
    fn summary_mentions_pending_model_and_busy() {
        let state = SessionState {
            selected_model: None,
            pending_model: Some("m2".into()),
            busy: Busy::LoadingModel,
            ..SessionState::default()
        };
        let summary = status_summary(&state);
        assert!(summary.starts_with("loading m2"));
        assert!(summary.contains("Loading model"));
    }
}
