// In-process sink used for dry runs and tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::fk_filter::KnownKeys;
use crate::normalize::RelationRow;
use crate::schema::TableSchema;
use crate::sink::RelationalSink;

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<RelationRow>,
}

impl MemoryTable {
    fn column_keys(&self, column: &str) -> Option<HashSet<String>> {
        let index = self.schema.column_index(column)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| row.get(index).and_then(|v| v.key()))
                .collect(),
        )
    }
}

/// Keeps tables as vectors of rows
///
/// Enforces what a database would: row shape and primary-key uniqueness
/// always, references into tables it holds while foreign-key checks are on.
/// Appends are all-or-nothing.
#[derive(Debug)]
pub struct MemorySink {
    tables: HashMap<String, MemoryTable>,
    fk_checks: bool,
    fail_on: Option<String>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            fk_checks: true,
            fail_on: None,
        }
    }

    /// Fail every create and append that touches `table`
    pub fn fail_on(mut self, table: impl Into<String>) -> Self {
        self.fail_on = Some(table.into());
        self
    }

    pub fn foreign_key_checks(&self) -> bool {
        self.fk_checks
    }

    pub fn rows(&self, table: &str) -> Option<&[RelationRow]> {
        self.tables.get(table).map(|t| t.rows.as_slice())
    }

    /// Names of existing tables, sorted
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn injected_failure(&self, table: &TableSchema) -> Result<()> {
        match &self.fail_on {
            Some(name) if *name == table.name => Err(IngestError::Sink(format!(
                "injected failure on {}",
                table.name
            ))),
            _ => Ok(()),
        }
    }

    fn check_append(&self, table: &TableSchema, rows: &[RelationRow]) -> Result<()> {
        let existing = self
            .tables
            .get(&table.name)
            .ok_or_else(|| IngestError::Sink(format!("table {} does not exist", table.name)))?;

        for row in rows {
            table.check_row(row).map_err(IngestError::Sink)?;
        }

        let pk: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let key_of = |row: &RelationRow| -> Vec<Option<String>> {
            pk.iter().map(|&i| row.get(i).and_then(|v| v.key())).collect()
        };

        let mut seen: HashSet<Vec<Option<String>>> = existing.rows.iter().map(key_of).collect();
        for row in rows {
            let key = key_of(row);
            if seen.contains(&key) {
                return Err(IngestError::Sink(format!(
                    "duplicate primary key {:?} in {}",
                    key, table.name
                )));
            }
            seen.insert(key);
        }

        if !self.fk_checks {
            return Ok(());
        }

        for (index, column, fk) in table.foreign_keys() {
            let targets = self
                .tables
                .get(&fk.table)
                .and_then(|t| t.column_keys(&fk.column))
                .ok_or_else(|| {
                    IngestError::Sink(format!(
                        "{}.{} references missing {}.{}",
                        table.name, column.name, fk.table, fk.column
                    ))
                })?;

            for row in rows {
                if let Some(key) = row.get(index).and_then(|v| v.key()) {
                    if !targets.contains(&key) {
                        return Err(IngestError::Sink(format!(
                            "foreign key violation: {}.{} = {} not in {}.{}",
                            table.name, column.name, key, fk.table, fk.column
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RelationalSink for MemorySink {
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        self.fk_checks = enabled;
        Ok(())
    }

    async fn create_table(&mut self, table: &TableSchema) -> Result<()> {
        self.injected_failure(table)?;
        self.tables
            .entry(table.name.clone())
            .or_insert_with(|| MemoryTable {
                schema: table.clone(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn drop_table(&mut self, table: &TableSchema) -> Result<()> {
        self.tables.remove(&table.name);
        Ok(())
    }

    async fn append(&mut self, table: &TableSchema, rows: &[RelationRow]) -> Result<u64> {
        self.injected_failure(table)?;
        self.check_append(table, rows)?;

        let stored = self
            .tables
            .get_mut(&table.name)
            .ok_or_else(|| IngestError::Sink(format!("table {} does not exist", table.name)))?;
        stored.rows.extend_from_slice(rows);

        debug!(table = %table.name, rows = rows.len(), "Appended to memory sink");
        Ok(rows.len() as u64)
    }

    async fn fetch_keys(&mut self, table: &TableSchema, column: &str) -> Result<KnownKeys> {
        let keys = self
            .tables
            .get(&table.name)
            .and_then(|t| t.column_keys(column))
            .ok_or_else(|| {
                IngestError::Sink(format!("cannot read {}.{}", table.name, column))
            })?;
        Ok(keys.into_iter().collect())
    }

    async fn row_count(&mut self, table: &TableSchema) -> Result<u64> {
        self.tables
            .get(&table.name)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| IngestError::Sink(format!("table {} does not exist", table.name)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coercion::Value;
    use crate::schema::{SchemaRegistry, NAME_BASICS, TITLE_BASICS, TITLE_GENRES};

    fn person(nconst: &str) -> RelationRow {
        RelationRow::new(vec![nconst.into(), Value::Null, Value::Null, Value::Null])
    }

    fn genre(tconst: &str, genre: &str) -> RelationRow {
        RelationRow::new(vec![tconst.into(), genre.into()])
    }

    async fn sink_with_schema() -> (MemorySink, SchemaRegistry) {
        let registry = SchemaRegistry::imdb().unwrap();
        let mut sink = MemorySink::new();
        registry.create_all(&mut sink, true).await.unwrap();
        (sink, registry)
    }

    #[tokio::test]
    async fn test_append_and_fetch_keys() {
        let (mut sink, registry) = sink_with_schema().await;
        let names = registry.table(NAME_BASICS).unwrap();

        let written = sink
            .append(names, &[person("nm1"), person("nm2")])
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(sink.row_count(names).await.unwrap(), 2);

        let keys = sink.fetch_keys(names, "nconst").await.unwrap();
        assert!(keys.contains("nm1"));
        assert!(keys.contains("nm2"));
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_rejects_whole_append() {
        let (mut sink, registry) = sink_with_schema().await;
        let names = registry.table(NAME_BASICS).unwrap();
        sink.append(names, &[person("nm1")]).await.unwrap();

        let result = sink.append(names, &[person("nm2"), person("nm1")]).await;
        assert!(result.is_err());
        assert_eq!(sink.row_count(names).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_foreign_key_enforced_only_when_checks_on() {
        let (mut sink, registry) = sink_with_schema().await;
        let genres = registry.table(TITLE_GENRES).unwrap();

        assert!(sink.append(genres, &[genre("tt404", "Drama")]).await.is_err());

        sink.set_foreign_key_checks(false).await.unwrap();
        sink.append(genres, &[genre("tt404", "Drama")]).await.unwrap();
        assert_eq!(sink.row_count(genres).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_to_missing_table() {
        let registry = SchemaRegistry::imdb().unwrap();
        let mut sink = MemorySink::new();
        let titles = registry.table(TITLE_BASICS).unwrap();
        assert!(sink.append(titles, &[]).await.is_err());
        assert!(sink.row_count(titles).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let registry = SchemaRegistry::imdb().unwrap();
        let mut sink = MemorySink::new().fail_on(NAME_BASICS);
        let names = registry.table(NAME_BASICS).unwrap();
        assert!(sink.create_table(names).await.is_err());
    }
}
