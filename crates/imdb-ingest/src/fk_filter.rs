// Foreign-key filtering against keys already loaded into the root tables

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::normalize::RelationRow;
use crate::schema::TableSchema;

/// Key values present in a referenced table column
#[derive(Debug, Clone, Default)]
pub struct KnownKeys {
    keys: HashSet<Box<str>>,
}

impl KnownKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: HashSet::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: impl Into<Box<str>>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Into<Box<str>>> FromIterator<K> for KnownKeys {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<K: Into<Box<str>>> Extend<K> for KnownKeys {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        self.keys.extend(iter.into_iter().map(Into::into));
    }
}

/// Rows that survived a filter and how many were dropped
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterOutcome {
    pub kept: Vec<RelationRow>,
    pub excluded: usize,
}

/// Keep rows whose `column` value appears in `known`
///
/// Membership is checked against the supplied key set, never against the
/// column's own values. A null reference is kept when the column is nullable
/// and excluded when it is NOT NULL, since the sink could never store it.
/// Relative order of kept rows is preserved and `excluded` is always
/// `rows.len() - kept.len()`.
pub fn filter(
    rows: Vec<RelationRow>,
    table: &TableSchema,
    column: &str,
    known: &KnownKeys,
) -> Result<FilterOutcome> {
    let index = table.column_index(column).ok_or_else(|| {
        IngestError::Schema(format!("{} has no column {}", table.name, column))
    })?;
    Ok(filter_at(rows, index, table.columns[index].nullable, known))
}

pub(crate) fn filter_at(
    rows: Vec<RelationRow>,
    index: usize,
    keep_null: bool,
    known: &KnownKeys,
) -> FilterOutcome {
    let total = rows.len();
    let kept: Vec<RelationRow> = rows
        .into_iter()
        .filter(|row| match row.get(index).and_then(|v| v.key()) {
            None => keep_null,
            Some(key) => known.contains(&key),
        })
        .collect();

    FilterOutcome {
        excluded: total - kept.len(),
        kept,
    }
}

/// A resolved foreign-key check for one column of a destination table
#[derive(Debug, Clone)]
pub struct ForeignKeyCheck {
    pub column: String,
    pub references: String,
    index: usize,
    nullable: bool,
    keys: Arc<KnownKeys>,
}

impl ForeignKeyCheck {
    pub fn new(table: &TableSchema, column: &str, keys: Arc<KnownKeys>) -> Result<Self> {
        let index = table.column_index(column).ok_or_else(|| {
            IngestError::Schema(format!("{} has no column {}", table.name, column))
        })?;
        let references = table.columns[index]
            .references
            .as_ref()
            .map(|fk| format!("{}.{}", fk.table, fk.column))
            .unwrap_or_default();

        Ok(Self {
            column: column.to_string(),
            references,
            index,
            nullable: table.columns[index].nullable,
            keys,
        })
    }

    pub fn apply(&self, rows: Vec<RelationRow>) -> FilterOutcome {
        filter_at(rows, self.index, self.nullable, &self.keys)
    }

    pub fn known_keys(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coercion::Value;
    use crate::schema::{SchemaRegistry, TITLE_EPISODES, TITLE_GENRES, TITLE_PRINCIPALS};

    fn genre(tconst: &str, genre: &str) -> RelationRow {
        RelationRow::new(vec![tconst.into(), genre.into()])
    }

    #[test]
    fn test_filter_keeps_known_and_drops_unknown() {
        let registry = SchemaRegistry::imdb().unwrap();
        let table = registry.table(TITLE_GENRES).unwrap();
        let known: KnownKeys = ["tt1", "tt3"].into_iter().collect();

        let rows = vec![
            genre("tt1", "Drama"),
            genre("tt2", "Drama"),
            genre("tt3", "Comedy"),
            genre("tt9", "Horror"),
        ];
        let outcome = filter(rows, table, "tconst", &known).unwrap();

        assert_eq!(outcome.kept, vec![genre("tt1", "Drama"), genre("tt3", "Comedy")]);
        assert_eq!(outcome.excluded, 2);
    }

    #[test]
    fn test_filter_checks_supplied_keys_not_own_column() {
        // Every row's key is present in the rows themselves; none is known.
        let registry = SchemaRegistry::imdb().unwrap();
        let table = registry.table(TITLE_GENRES).unwrap();
        let rows = vec![genre("tt1", "Drama"), genre("tt2", "Comedy")];

        let outcome = filter(rows, table, "tconst", &KnownKeys::new()).unwrap();
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.excluded, 2);
    }

    #[test]
    fn test_filter_keeps_null_in_nullable_column() {
        let registry = SchemaRegistry::imdb().unwrap();
        let table = registry.table(TITLE_PRINCIPALS).unwrap();
        let known: KnownKeys = ["nm1"].into_iter().collect();
        let rows = vec![RelationRow::new(vec![
            "tt1".into(),
            Value::Int(1),
            Value::Null,
            "self".into(),
            Value::Null,
            Value::Null,
        ])];

        let outcome = filter(rows, table, "nconst", &known).unwrap();
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.excluded, 0);
    }

    #[test]
    fn test_filter_excludes_null_in_not_null_column() {
        let registry = SchemaRegistry::imdb().unwrap();
        let table = registry.table(TITLE_EPISODES).unwrap();
        let known: KnownKeys = ["tt1", "tt2"].into_iter().collect();
        let episode = |tconst: &str, parent: Value| {
            RelationRow::new(vec![tconst.into(), parent, Value::Int(1), Value::Int(2)])
        };
        let rows = vec![episode("tt2", "tt1".into()), episode("tt1", Value::Null)];

        let outcome = filter(rows, table, "parent_tconst", &known).unwrap();
        assert_eq!(outcome.kept, vec![episode("tt2", "tt1".into())]);
        assert_eq!(outcome.excluded, 1);

        let check =
            ForeignKeyCheck::new(table, "parent_tconst", Arc::new(known)).unwrap();
        let outcome = check.apply(vec![episode("tt1", Value::Null)]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.excluded, 1);
    }

    #[test]
    fn test_filter_unknown_column() {
        let registry = SchemaRegistry::imdb().unwrap();
        let table = registry.table(TITLE_GENRES).unwrap();
        assert!(filter(Vec::new(), table, "nconst", &KnownKeys::new()).is_err());
    }

    #[test]
    fn test_check_describes_reference() {
        let registry = SchemaRegistry::imdb().unwrap();
        let table = registry.table(TITLE_GENRES).unwrap();
        let check = ForeignKeyCheck::new(table, "tconst", Arc::new(KnownKeys::new())).unwrap();
        assert_eq!(check.references, "title_basics.tconst");
        assert_eq!(check.known_keys(), 0);
    }
}
