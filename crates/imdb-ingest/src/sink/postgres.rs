// Postgres sink

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::PgConnection;
use sqlx::query_builder::Separated;
use sqlx::{Connection, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::coercion::Value;
use crate::error::{IngestError, Result};
use crate::fk_filter::KnownKeys;
use crate::normalize::RelationRow;
use crate::schema::{quote_ident, FieldKind, TableSchema};
use crate::sink::RelationalSink;

/// Upper bound on bind parameters in one Postgres statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Writes to Postgres over a single connection
///
/// Referential checks are toggled with `session_replication_role`, which is
/// per session, so the sink holds one connection rather than a
/// pool. Each `append` runs in its own transaction and is split into as many
/// multi-row INSERTs as the bind-parameter limit requires.
pub struct PgSink {
    conn: PgConnection,
}

impl PgSink {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let conn = PgConnection::connect(database_url).await?;
        info!("Connected to Postgres");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: PgConnection) -> Self {
        Self { conn }
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    fn rows_per_statement(table: &TableSchema) -> usize {
        (MAX_BIND_PARAMS / table.columns.len().max(1)).max(1)
    }
}

/// Bind one value with the Postgres type of its column
///
/// Nulls are bound as typed `None`s so the server never has to guess.
/// Rows have been through `check_row`, so the narrowing conversions succeed.
fn bind_value(b: &mut Separated<'_, '_, Postgres, &'static str>, kind: FieldKind, value: &Value) {
    match kind {
        FieldKind::Text | FieldKind::Categorical => {
            b.push_bind(value.as_text().map(str::to_string));
        }
        FieldKind::SmallInt => {
            b.push_bind(as_int(value).and_then(|n| i16::try_from(n).ok()));
        }
        FieldKind::Int => {
            b.push_bind(as_int(value).and_then(|n| i32::try_from(n).ok()));
        }
        FieldKind::BigInt => {
            b.push_bind(as_int(value));
        }
        FieldKind::Float => {
            let x = match value {
                Value::Float(x) => Some(*x),
                Value::Int(n) => Some(*n as f64),
                _ => None,
            };
            b.push_bind(x);
        }
        FieldKind::Boolean => {
            let flag = match value {
                Value::Bool(flag) => Some(*flag),
                _ => None,
            };
            b.push_bind(flag);
        }
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        _ => None,
    }
}

#[async_trait]
impl RelationalSink for PgSink {
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        let role = if enabled { "origin" } else { "replica" };
        sqlx::query(&format!("SET session_replication_role = {}", role))
            .execute(&mut self.conn)
            .await?;
        debug!(enabled, "Foreign key checks toggled");
        Ok(())
    }

    async fn create_table(&mut self, table: &TableSchema) -> Result<()> {
        sqlx::query(&table.create_sql()).execute(&mut self.conn).await?;
        debug!(table = %table.name, "Created table");
        Ok(())
    }

    async fn drop_table(&mut self, table: &TableSchema) -> Result<()> {
        sqlx::query(&table.drop_sql()).execute(&mut self.conn).await?;
        debug!(table = %table.name, "Dropped table");
        Ok(())
    }

    async fn append(&mut self, table: &TableSchema, rows: &[RelationRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        for row in rows {
            table.check_row(row).map_err(IngestError::Sink)?;
        }

        let columns = table
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!("INSERT INTO {} ({}) ", quote_ident(&table.name), columns);

        let mut tx = self.conn.begin().await?;
        let mut written = 0u64;

        for batch in rows.chunks(Self::rows_per_statement(table)) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(&insert);
            qb.push_values(batch, |mut b, row| {
                for (column, value) in table.columns.iter().zip(row.values()) {
                    bind_value(&mut b, column.kind, value);
                }
            });
            let result = qb.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn fetch_keys(&mut self, table: &TableSchema, column: &str) -> Result<KnownKeys> {
        if table.column(column).is_none() {
            return Err(IngestError::Schema(format!(
                "{} has no column {}",
                table.name, column
            )));
        }

        let sql = format!(
            "SELECT {col}::text FROM {table} WHERE {col} IS NOT NULL",
            col = quote_ident(column),
            table = quote_ident(&table.name)
        );

        let mut keys = KnownKeys::new();
        let mut stream = sqlx::query_scalar::<_, String>(&sql).fetch(&mut self.conn);
        while let Some(key) = stream.try_next().await? {
            keys.insert(key);
        }

        debug!(table = %table.name, column, keys = keys.len(), "Fetched known keys");
        Ok(keys)
    }

    async fn row_count(&mut self, table: &TableSchema) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&table.name));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut self.conn).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    #[test]
    fn test_rows_per_statement_stays_under_bind_limit() {
        let registry = SchemaRegistry::imdb().unwrap();
        for table in registry.tables() {
            let rows = PgSink::rows_per_statement(table);
            assert!(rows * table.columns.len() <= MAX_BIND_PARAMS, "{}", table.name);
            assert!(rows > 0);
        }
    }
}
