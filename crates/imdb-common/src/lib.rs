//! IMDb ETL Common Library
//!
//! Shared utilities used by every workspace member.
//!
//! # Overview
//!
//! - **Error Handling**: the shared error type and result alias
//! - **Environment**: typed environment variable lookups used by configuration loaders
//! - **Logging**: `tracing` subscriber setup (console, file, or both; text or JSON)
//!
//! # Example
//!
//! ```no_run
//! use imdb_common::env::var_or;
//! use imdb_common::Result;
//!
//! fn chunk_size() -> Result<usize> {
//!     var_or("IMDB_CHUNK_SIZE", 5_000)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
