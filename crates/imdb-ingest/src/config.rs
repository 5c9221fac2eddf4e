//! Configuration management
//!
//! Values come from the environment (after loading `.env` if present) with
//! the defaults below. The CLI overrides individual fields afterwards.

use imdb_common::env::{var_flag, var_opt, var_or};
use serde::Serialize;
use std::path::PathBuf;

use crate::coercion::{IntegerPolicy, DEFAULT_NULL_SENTINEL};
use crate::downloader::DEFAULT_BASE_URL;
use crate::error::{IngestError, Result};
use crate::loader::DEFAULT_CHUNK_SIZE;
use crate::pipeline::{ErrorPolicy, PipelineOptions};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/imdb";

/// Default directory holding the decompressed dumps.
pub const DEFAULT_DATA_DIR: &str = "./tsv_dump";

/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: usize = 1_000_000;

/// Ingest configuration
#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    #[serde(skip_serializing)]
    pub database_url: String,
    pub data_dir: PathBuf,
    pub base_url: String,
    pub chunk_size: usize,
    pub null_sentinel: String,
    pub row_limit: Option<u64>,
    pub integer_policy: IntegerPolicy,
    pub error_policy: ErrorPolicy,
    /// Fetch missing dump files before loading
    pub download: bool,
    pub toggle_fk_checks: bool,
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            base_url: DEFAULT_BASE_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            null_sentinel: DEFAULT_NULL_SENTINEL.to_string(),
            row_limit: None,
            integer_policy: IntegerPolicy::default(),
            error_policy: ErrorPolicy::default(),
            download: false,
            toggle_fk_checks: true,
            show_progress: true,
        }
    }
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL.to_string())?,
            data_dir: var_or("IMDB_DATA_DIR", PathBuf::from(DEFAULT_DATA_DIR))?,
            base_url: var_or("IMDB_BASE_URL", DEFAULT_BASE_URL.to_string())?,
            chunk_size: var_or("IMDB_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            null_sentinel: std::env::var("IMDB_NULL_SENTINEL")
                .unwrap_or_else(|_| DEFAULT_NULL_SENTINEL.to_string()),
            row_limit: var_opt("IMDB_ROW_LIMIT")?,
            integer_policy: var_or("IMDB_INTEGER_POLICY", IntegerPolicy::default())?,
            error_policy: var_or("IMDB_ERROR_POLICY", ErrorPolicy::default())?,
            download: var_flag("IMDB_DOWNLOAD", false)?,
            toggle_fk_checks: var_flag("IMDB_TOGGLE_FK_CHECKS", true)?,
            show_progress: var_flag("IMDB_PROGRESS", true)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loader cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(IngestError::Config(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.null_sentinel.is_empty() {
            return Err(IngestError::Config("null sentinel must not be empty".to_string()));
        }
        if self.row_limit == Some(0) {
            return Err(IngestError::Config("row limit must be positive".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(IngestError::Config(format!(
                "base URL must be http(s), got {}",
                self.base_url
            )));
        }
        if self.database_url.trim().is_empty() {
            return Err(IngestError::Config("DATABASE_URL must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            data_dir: self.data_dir.clone(),
            chunk_size: self.chunk_size,
            null_sentinel: self.null_sentinel.clone(),
            integer_policy: self.integer_policy,
            row_limit: self.row_limit,
            error_policy: self.error_policy,
            toggle_fk_checks: self.toggle_fk_checks,
            reset_schema: true,
            show_progress: self.show_progress,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        IngestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            IngestConfig {
                chunk_size: 0,
                ..IngestConfig::default()
            },
            IngestConfig {
                chunk_size: MAX_CHUNK_SIZE + 1,
                ..IngestConfig::default()
            },
            IngestConfig {
                null_sentinel: String::new(),
                ..IngestConfig::default()
            },
            IngestConfig {
                row_limit: Some(0),
                ..IngestConfig::default()
            },
            IngestConfig {
                base_url: "ftp://datasets.imdbws.com".to_string(),
                ..IngestConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_pipeline_options_carry_settings() {
        let config = IngestConfig {
            chunk_size: 250,
            row_limit: Some(1000),
            error_policy: ErrorPolicy::FailFast,
            ..IngestConfig::default()
        };
        let options = config.pipeline_options();
        assert_eq!(options.chunk_size, 250);
        assert_eq!(options.row_limit, Some(1000));
        assert_eq!(options.error_policy, ErrorPolicy::FailFast);
        assert!(options.reset_schema);
    }

    #[test]
    fn test_serialized_config_hides_database_url() {
        let json = serde_json::to_value(IngestConfig::default()).unwrap();
        assert!(json.get("database_url").is_none());
        assert_eq!(json["chunk_size"], 5000);
    }
}
