//! Error types for the chat core.

use wgpt_core::error::WgptError;
use wgpt_voice::CaptureError;

/// Errors from the chat core.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ChatError {
    /// Rejected user input, such as a non-image attachment.
    #[error("{0}")]
    Validation(String),
    /// The completion call failed, timed out or returned a non-success status.
    #[error("completion service error: {0}")]
    Service(String),
    /// A conversation or message id that no longer exists.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<WgptError> for ChatError {
    fn from(err: WgptError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl ChatError {
    pub(crate) fn conversation_not_found(id: &str) -> Self {
        ChatError::NotFound {
            kind: "conversation",
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::Validation("Please select a valid image file".to_string());
        assert_eq!(err.to_string(), "Please select a valid image file");

        let err = ChatError::Service("HTTP 500".to_string());
        assert_eq!(err.to_string(), "completion service error: HTTP 500");

        let err = ChatError::conversation_not_found("conv_1");
        assert_eq!(err.to_string(), "conversation not found: conv_1");

        let err = ChatError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn test_capture_error_is_transparent() {
        let err: ChatError = CaptureError::AlreadyActive.into();
        assert_eq!(err.to_string(), "Already listening");
        assert!(matches!(err, ChatError::Capture(CaptureError::AlreadyActive)));
    }

    #[test]
    fn test_chat_error_from_wgpt_error() {
        let chat_err: ChatError = WgptError::Storage("connection lost".to_string()).into();
        assert!(matches!(chat_err, ChatError::Storage(_)));
        assert!(chat_err.to_string().contains("connection lost"));
    }
}
