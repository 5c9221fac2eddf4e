//! Logging configuration and initialization
//!
//! Every binary in the workspace logs through `tracing`. This module installs
//! the global subscriber:
//!
//! - console, rolling file, or both
//! - human readable text or JSON lines
//! - a level plus optional per-target directives (`sqlx=warn,imdb_ingest=debug`)
//!
//! Use the structured macros (`info!`, `warn!`, ...) with fields rather than
//! formatting values into the message:
//!
//! ```rust
//! use tracing::warn;
//!
//! let table = "title_genres";
//! let skipped = 3;
//! warn!(table, skipped, "Skipped malformed lines");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use imdb_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> imdb_common::Result<()> {
//!     let config = LogConfig::builder()
//!         .level(LogLevel::Debug)
//!         .log_file_prefix("imdb-ingest")
//!         .build()
//!         .merge_env()?;
//!
//!     // Keep the guard alive until exit so buffered file output is flushed
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("started");
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::env::{var_flag, var_opt};
use crate::error::{CommonError, Result};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(CommonError::Parse(format!("invalid log level: {s}"))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where log events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    /// Console and a rolling file, like a long batch run usually wants
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(CommonError::Parse(format!("invalid log output: {s}"))),
        }
    }
}

impl fmt::Display for LogOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogOutput::Console => "console",
            LogOutput::File => "file",
            LogOutput::Both => "both",
        })
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(CommonError::Parse(format!("invalid log format: {s}"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "imdb-ingest" -> "imdb-ingest.2026-10-19"
    pub log_file_prefix: String,
    /// Extra comma separated filter directives
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "imdb-etl".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    /// Override fields from `LOG_*` environment variables
    ///
    /// - `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`
    /// - `LOG_DIR`, `LOG_FILE_PREFIX`, `LOG_FILTER`
    /// - `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`
    ///
    /// Unset variables keep the value already in `self`.
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = var_opt("LOG_LEVEL")? {
            self.level = level;
        }
        if let Some(output) = var_opt("LOG_OUTPUT")? {
            self.output = output;
        }
        if let Some(format) = var_opt("LOG_FORMAT")? {
            self.format = format;
        }
        if let Some(dir) = var_opt::<String>("LOG_DIR")? {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = var_opt("LOG_FILE_PREFIX")? {
            self.log_file_prefix = prefix;
        }
        if let Some(filter) = var_opt("LOG_FILTER")? {
            self.filter_directives = Some(filter);
        }
        self.include_location = var_flag("LOG_INCLUDE_LOCATION", self.include_location)?;
        self.include_thread_ids = var_flag("LOG_INCLUDE_THREAD_IDS", self.include_thread_ids)?;
        self.include_targets = var_flag("LOG_INCLUDE_TARGETS", self.include_targets)?;

        Ok(self)
    }

    /// Build the env filter: `RUST_LOG`, then the level, then extra directives
    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter =
            EnvFilter::from_default_env().add_directive(self.level.to_tracing_level().into());

        if let Some(directives) = &self.filter_directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let parsed = directive.parse().map_err(|e| {
                    CommonError::Config(format!("invalid filter directive {directive:?}: {e}"))
                })?;
                filter = filter.add_directive(parsed);
            }
        }

        Ok(filter)
    }
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn include_location(mut self, include: bool) -> Self {
        self.config.include_location = include;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Keeps the non-blocking file writer alive; drop it last
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// Call once at startup. A second call fails because a global subscriber is
/// already set.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let filter = config.env_filter()?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.output.console() {
        layers.push(fmt_layer(config, std::io::stdout, true));
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        layers.push(fmt_layer(config, writer, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| CommonError::Config(format!("failed to install subscriber: {e}")))?;

    Ok(LogGuard { _file: file_guard })
}

fn fmt_layer<S, W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
