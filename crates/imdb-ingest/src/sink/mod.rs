//! Relational sinks
//!
//! A sink is where normalized rows end up. The pipeline only talks to the
//! [`RelationalSink`] trait; [`PgSink`] writes to Postgres and [`MemorySink`]
//! keeps everything in process for dry runs and tests.

mod memory;
mod postgres;

pub use memory::MemorySink;
pub use postgres::PgSink;

use async_trait::async_trait;

use crate::error::Result;
use crate::fk_filter::KnownKeys;
use crate::normalize::RelationRow;
use crate::schema::TableSchema;

#[async_trait]
pub trait RelationalSink: Send {
    /// Switch referential-integrity enforcement for this session
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()>;

    /// Create `table` if it does not exist
    async fn create_table(&mut self, table: &TableSchema) -> Result<()>;

    /// Drop `table` if it exists
    async fn drop_table(&mut self, table: &TableSchema) -> Result<()>;

    /// Append rows atomically, returning how many were written
    ///
    /// Either every row of the call is stored or none is.
    async fn append(&mut self, table: &TableSchema, rows: &[RelationRow]) -> Result<u64>;

    /// Every non-null value of `column`, as text
    async fn fetch_keys(&mut self, table: &TableSchema, column: &str) -> Result<KnownKeys>;

    async fn row_count(&mut self, table: &TableSchema) -> Result<u64>;
}
