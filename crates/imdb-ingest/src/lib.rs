//! IMDb Ingest Library
//!
//! Streams the published IMDb TSV dumps into a normalized relational schema:
//! two root tables (`name_basics`, `title_basics`) and nine tables that
//! reference them.
//!
//! Each table is filled by a load job that reads one dump file in bounded
//! chunks, coerces raw tokens to typed values, explodes comma-separated list
//! columns into junction rows, drops rows whose keys are not in the root
//! tables and appends the rest to a [`RelationalSink`].
//!
//! # Example
//!
//! ```no_run
//! use imdb_ingest::{Pipeline, PipelineOptions, PgSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::imdb(PipelineOptions::default())?;
//!     let mut sink = PgSink::connect("postgresql://localhost/imdb").await?;
//!     let report = pipeline.run(&mut sink).await?;
//!     println!("{} rows loaded", report.rows_appended());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod coercion;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fk_filter;
pub mod jobs;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod sink;
pub mod source;

pub use coercion::{coerce, IntegerPolicy, Value};
pub use config::IngestConfig;
pub use downloader::DumpDownloader;
pub use error::{IngestError, Result};
pub use fk_filter::{filter, KnownKeys};
pub use loader::{load, LoadContext, LoadReport};
pub use normalize::{normalize, Projection, RelationRow};
pub use pipeline::{ErrorPolicy, JobOutcome, JobStatus, Pipeline, PipelineOptions, RunReport};
pub use schema::{FieldKind, SchemaRegistry, TableSchema};
pub use sink::{MemorySink, PgSink, RelationalSink};
pub use source::Dataset;
