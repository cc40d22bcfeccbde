use thiserror::Error;

/// Failures surfaced to the presentation layer through `SessionState::last_error`.
///
/// Intents never return these; they are recorded on the session and rendered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("model registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("failed to load model {id}: {reason}")]
    ModelLoadFailed { id: String, reason: String },

    /// Logged only, never stored as `last_error`.
    #[error("failed to unload model {id}: {reason}")]
    ModelUnloadFailed { id: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("another {0} is still in progress")]
    Busy(&'static str),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Internal: a response arrived for an intent that has since been superseded.
    #[error("discarded stale {0} response")]
    StaleResponseDiscarded(&'static str),
}

impl SessionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    /// Whether the error is meant for the user rather than the log.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ModelUnloadFailed { .. } | Self::StaleResponseDiscarded(_))
    }
}
