use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{error, info};

enum PlayerCommand {
    Play { label: String, bytes: Arc<[u8]> },
    Stop,
}

/// Sends playback commands to the audio thread. The output stream is not
/// `Send`, so it never leaves that thread.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn play(&self, label: impl Into<String>, bytes: Arc<[u8]>) -> Result<()> {
        self.tx
            .send(PlayerCommand::Play { label: label.into(), bytes })
            .map_err(|_| anyhow!("audio thread has stopped"))
    }

    pub fn stop(&self) -> Result<()> {
        self.tx.send(PlayerCommand::Stop).map_err(|_| anyhow!("audio thread has stopped"))
    }
}

pub fn spawn() -> Result<PlayerHandle> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("studio-audio".into())
        .spawn(move || run(rx))
        .context("failed to spawn audio thread")?;
    Ok(PlayerHandle { tx })
}

fn run(rx: Receiver<PlayerCommand>) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(err) => {
            error!("failed to open audio output: {err}");
            // Keep draining so senders never block on a dead channel.
            while rx.recv().is_ok() {}
            return;
        }
    };
    let mut sink: Option<Sink> = None;
    while let Ok(command) = rx.recv() {
        if let Some(current) = sink.take() {
            current.stop();
        }
        if let PlayerCommand::Play { label, bytes } = command {
            match start(&handle, bytes) {
                Ok(started) => {
                    info!("playing {label}");
                    sink = Some(started);
                }
                Err(err) => error!("failed to play {label}: {err}"),
            }
        }
    }
}

fn start(handle: &OutputStreamHandle, bytes: Arc<[u8]>) -> Result<Sink> {
    let decoder = Decoder::new(Cursor::new(bytes)).context("failed to decode audio")?;
    let sink = Sink::try_new(handle).context("failed to create audio sink")?;
    sink.append(decoder);
    sink.play();
    Ok(sink)
}

/// Length of an encoded clip, when the container states it.
pub fn probe_duration(bytes: &Arc<[u8]>) -> Option<f32> {
    let decoder = Decoder::new(Cursor::new(Arc::clone(bytes))).ok()?;
    decoder.total_duration().map(|duration| duration.as_secs_f32())
}
