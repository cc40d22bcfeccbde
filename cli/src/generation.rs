use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::api::{Backend, BackendError};
use crate::error::SessionError;
use crate::state::{SessionState, Track};
use crate::types::{ExtendBody, GenerateBody, GenerationMode};

const TRACK_NAME_LIMIT: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Server id of an uploaded file.
    Upload(String),
    Track(String),
}

impl SourceRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Upload(id) | Self::Track(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub content_prompt: String,
    pub style_prompt: String,
    pub has_vocals: bool,
    pub mode: GenerationMode,
    pub source_ref: Option<SourceRef>,
    pub duration_hint: Option<u32>,
}

impl GenerationRequest {
    /// Builds a request from the prompt fields, mode and upload of `state`.
    pub fn from_state(state: &SessionState) -> Option<Self> {
        let model_id = state.selected_model.clone()?;
        let source_ref = match state.mode {
            GenerationMode::Remix => {
                state.uploaded_file.as_ref().map(|file| SourceRef::Upload(file.server_id.clone()))
            }
            _ => None,
        };
        Some(Self {
            model_id,
            content_prompt: state.prompt.content.trim().to_string(),
            style_prompt: state.prompt.style.trim().to_string(),
            has_vocals: state.prompt.has_vocals,
            mode: state.mode,
            source_ref,
            duration_hint: state.prompt.duration_hint,
        })
    }

    /// Extension of an existing track with the currently active model.
    pub fn extend(track: &Track, model_id: &str, seconds: u32) -> Self {
        Self {
            model_id: model_id.to_string(),
            content_prompt: track.content_prompt.clone(),
            style_prompt: track.style_prompt.clone(),
            has_vocals: track.has_vocals,
            mode: GenerationMode::Extend,
            source_ref: Some(SourceRef::Track(track.id.clone())),
            duration_hint: Some(seconds),
        }
    }

    /// The history entry an extension replaces.
    pub fn replaces(&self) -> Option<&str> {
        match (&self.mode, &self.source_ref) {
            (GenerationMode::Extend, Some(SourceRef::Track(id))) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Client-side preconditions. Nothing here touches the network.
    pub fn validate(&self, state: &SessionState) -> Result<(), SessionError> {
        let Some(active) = state.selected_model.as_deref() else {
            return Err(SessionError::invalid("no model is loaded"));
        };
        if active != self.model_id {
            return Err(SessionError::invalid(format!(
                "model {} is not the active model ({active})",
                self.model_id
            )));
        }
        match self.mode {
            GenerationMode::Generate => {
                if self.content_prompt.trim().is_empty() {
                    return Err(SessionError::invalid("prompt is empty"));
                }
            }
            GenerationMode::Remix => {
                if self.content_prompt.trim().is_empty() && self.style_prompt.trim().is_empty() {
                    return Err(SessionError::invalid("remix needs a content or style prompt"));
                }
                let uploaded = state.uploaded_file.as_ref().map(|file| file.server_id.as_str());
                match &self.source_ref {
                    Some(SourceRef::Upload(id)) if Some(id.as_str()) == uploaded => {}
                    _ => return Err(SessionError::invalid("remix needs an uploaded source file")),
                }
            }
            GenerationMode::Extend => match &self.source_ref {
                Some(SourceRef::Track(id)) if state.history.contains(id) => {}
                _ => return Err(SessionError::invalid("extend needs a track from the history")),
            },
        }
        Ok(())
    }

    pub fn generate_body(&self) -> GenerateBody {
        GenerateBody {
            model: self.model_id.clone(),
            prompt: self.content_prompt.clone(),
            style_prompt: self.style_prompt.clone(),
            has_vocals: self.has_vocals,
            mode: self.mode,
            source_ref: self.source_ref.as_ref().map(|source| source.id().to_string()),
            duration: self.duration_hint,
        }
    }

    pub fn extend_body(&self, default_seconds: u32) -> Option<ExtendBody> {
        let track_id = self.replaces()?;
        Some(ExtendBody {
            track_id: track_id.to_string(),
            model: self.model_id.clone(),
            duration: self.duration_hint.unwrap_or(default_seconds),
        })
    }

    /// Display name for the resulting track.
    pub fn track_name(&self, original: Option<&Track>) -> String {
        if let Some(track) = original {
            return format!("{} (extended)", track.name);
        }
        let source =
            if self.content_prompt.is_empty() { &self.style_prompt } else { &self.content_prompt };
        let mut name: String = source.chars().take(TRACK_NAME_LIMIT).collect();
        if source.chars().count() > TRACK_NAME_LIMIT {
            name.push('…');
        }
        if name.is_empty() {
            name = self.mode.label().to_string();
        }
        name
    }
}

/// Fetches audio for a track the backend only returned an id for.
///
/// A not-ready answer gets exactly one retry after `retry_delay`; anything else
/// fails straight away.
pub async fn resolve_audio<B: Backend>(
    backend: &B,
    track_id: &str,
    retry_delay: Duration,
) -> Result<Vec<u8>, BackendError> {
    match backend.fetch_audio(track_id).await {
        Err(BackendError::NotReady(what)) => {
            debug!("{what}; retrying in {}ms", retry_delay.as_millis());
            sleep(retry_delay).await;
            backend.fetch_audio(track_id).await.inspect_err(|err| {
                warn!("audio for track {track_id} still unavailable: {err}");
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AudioSource, PlayableHandle, ResourcePool};
    use crate::state::UploadedFile;
    use std::sync::Arc;

    fn handle() -> PlayableHandle {
        ResourcePool::new().acquire(AudioSource::Generated(Arc::from(&b"x"[..])))
    }

    fn state_with_model() -> SessionState {
        SessionState { selected_model: Some("m1".into()), ..SessionState::default() }
    }

    fn request(mode: GenerationMode) -> GenerationRequest {
        GenerationRequest {
            model_id: "m1".into(),
            content_prompt: "warm lofi piano".into(),
            style_prompt: String::new(),
            has_vocals: false,
            mode,
            source_ref: None,
            duration_hint: None,
        }
    }

    #[test]
    fn rejects_without_active_model() {
        let err = request(GenerationMode::Generate).validate(&SessionState::default()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
    }

    #[test]
    fn rejects_mismatched_model() {
        let mut req = request(GenerationMode::Generate);
        req.model_id = "m2".into();
        assert!(req.validate(&state_with_model()).is_err());
    }

    #[test]
    fn remix_requires_current_upload() {
        let mut state = state_with_model();
        let mut req = request(GenerationMode::Remix);
        req.source_ref = Some(SourceRef::Upload("f1".into()));
        assert!(req.validate(&state).is_err());

        state.uploaded_file = Some(UploadedFile {
            name: "loop.wav".into(),
            size: 4,
            server_id: "f1".into(),
            audio: handle(),
        });
        assert!(req.validate(&state).is_ok());

        req.source_ref = Some(SourceRef::Upload("f0".into()));
        assert!(req.validate(&state).is_err());
    }

    #[test]
    fn names_truncate_long_prompts() {
        let mut req = request(GenerationMode::Generate);
        req.content_prompt = "a".repeat(60);
        let name = req.track_name(None);
        assert_eq!(name.chars().count(), TRACK_NAME_LIMIT + 1);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn from_state_attaches_upload_only_in_remix() {
        let mut state = state_with_model();
        state.prompt.content = "  dub techno  ".into();
        state.uploaded_file = Some(UploadedFile {
            name: "loop.wav".into(),
            size: 4,
            server_id: "f9".into(),
            audio: handle(),
        });

        let plain = GenerationRequest::from_state(&state).unwrap();
        assert_eq!(plain.content_prompt, "dub techno");
        assert!(plain.source_ref.is_none());

        state.mode = GenerationMode::Remix;
        let remix = GenerationRequest::from_state(&state).unwrap();
        assert_eq!(remix.source_ref, Some(SourceRef::Upload("f9".into())));
        assert_eq!(remix.generate_body().source_ref.as_deref(), Some("f9"));
    }
}
