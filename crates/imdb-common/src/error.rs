//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Shared error type
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidVar {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),
}
