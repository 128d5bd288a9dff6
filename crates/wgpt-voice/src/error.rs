use thiserror::Error;

/// Errors produced by speech capture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CaptureError {
    /// The host offers no speech recognition.
    #[error("Speech recognition not supported")]
    Unsupported,

    /// A capture session is already running.
    #[error("Already listening")]
    AlreadyActive,

    /// The session was stopped before a transcript arrived.
    #[error("Speech capture cancelled")]
    Cancelled,

    /// The recognizer reported an error.
    #[error("Speech recognition failed: {0}")]
    Failed(String),
}
