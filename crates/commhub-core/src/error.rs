//! Error types for the core module

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Composite id carries a namespace this engine does not know
    #[error("Unrecognized item type: {0}")]
    UnrecognizedItemType(String),

    /// Composite id is structurally broken (no separator, non-numeric suffix)
    #[error("Invalid item id: {0}")]
    InvalidItemId(String),

    /// Backend call failed
    #[error("Backend error: {0}")]
    Api(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning task has already shut down
    #[error("Engine is not running")]
    EngineStopped,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<commhub_api::ApiError> for CoreError {
    fn from(e: commhub_api::ApiError) -> Self {
        CoreError::Api(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
