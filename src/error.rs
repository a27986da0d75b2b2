//! Error types for the Windowgate service.

use thiserror::Error;

/// Main error type for Windowgate operations.
#[derive(Error, Debug)]
pub enum WindowgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Windowgate operations.
pub type Result<T> = std::result::Result<T, WindowgateError>;
