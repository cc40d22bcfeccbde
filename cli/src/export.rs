use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::Track;
use crate::types::AudioFormat;

#[derive(Debug, Clone, Serialize)]
struct TrackMetadata {
    id: String,
    name: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f32>,
    has_vocals: bool,
    content_prompt: String,
    style_prompt: String,
    created_at: DateTime<Utc>,
    audio_path: String,
}

/// Server ids end up as path components, so they must be a single plain name.
fn check_track_id(id: &str) -> Result<()> {
    let mut components = Path::new(id).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || id.contains(['/', '\\']) {
        bail!("track id {id:?} cannot be used as a file name");
    }
    Ok(())
}

/// Writes `<dir>/<track id>/<track id>.<ext>` plus a `metadata.json` beside it.
pub async fn export_track(
    dir: PathBuf,
    track: Track,
    bytes: Arc<[u8]>,
    format: AudioFormat,
) -> Result<PathBuf> {
    check_track_id(&track.id)?;
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let track_dir = dir.join(&track.id);
        fs::create_dir_all(&track_dir)
            .with_context(|| format!("failed to create export dir {}", track_dir.display()))?;

        let audio_path = track_dir.join(format!("{}.{}", track.id, format.extension()));
        fs::write(&audio_path, &bytes[..])
            .with_context(|| format!("failed to write audio to {}", audio_path.display()))?;

        let metadata = TrackMetadata {
            id: track.id,
            name: track.name,
            model: track.model,
            duration_seconds: track.duration_seconds,
            has_vocals: track.has_vocals,
            content_prompt: track.content_prompt,
            style_prompt: track.style_prompt,
            created_at: track.created_at,
            audio_path: audio_path.to_string_lossy().to_string(),
        };
        let metadata_path = track_dir.join("metadata.json");
        let metadata_json =
            serde_json::to_vec_pretty(&metadata).context("failed to encode track metadata")?;
        fs::write(&metadata_path, metadata_json)
            .with_context(|| format!("failed to write metadata at {}", metadata_path.display()))?;

        Ok(audio_path)
    })
    .await
    .context("export task panicked")?
}
