//! Error types for the ingest pipeline

use std::path::PathBuf;

use crate::coercion::CoercionError;

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while downloading, reading, transforming or storing dumps
///
/// Recoverable conditions (malformed lines, unparseable booleans, dangling
/// foreign keys) never show up here; they are logged and counted by the
/// loader. Everything in this enum ends the current job.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV read error: {0}")]
    Csv(#[from] csv_async::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Download error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("line {line}, column {column}: {source}")]
    Coercion {
        line: u64,
        column: String,
        source: CoercionError,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] imdb_common::CommonError),

    #[error("Dependency error: {0}")]
    Dependency(String),
}
