use thiserror::Error;

/// Top-level error type for the WGPT client.
///
/// Subsystem crates define their own error types and convert into or out of
/// `WgptError` at the crate boundary so that `?` works across crates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WgptError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for WgptError {
    fn from(err: toml::de::Error) -> Self {
        WgptError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for WgptError {
    fn from(err: toml::ser::Error) -> Self {
        WgptError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for WgptError {
    fn from(err: serde_json::Error) -> Self {
        WgptError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for WGPT operations.
pub type Result<T> = std::result::Result<T, WgptError>;
