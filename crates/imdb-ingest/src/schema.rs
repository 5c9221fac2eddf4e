// Relational schema: field kinds, table definitions and the IMDb table set

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::coercion::Value;
use crate::error::{IngestError, Result};
use crate::normalize::RelationRow;
use crate::sink::RelationalSink;

// ============================================================================
// Field Kinds
// ============================================================================

/// Declared type of a source column or destination column
///
/// The same descriptor drives coercion of raw tokens and the storage type of
/// the destination column, so the two can never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    /// Low-cardinality text (title type, genre, region...)
    Categorical,
    SmallInt,
    Int,
    BigInt,
    Float,
    Boolean,
}

impl FieldKind {
    /// Postgres column type
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Categorical => "TEXT",
            FieldKind::SmallInt => "SMALLINT",
            FieldKind::Int => "INTEGER",
            FieldKind::BigInt => "BIGINT",
            FieldKind::Float => "DOUBLE PRECISION",
            FieldKind::Boolean => "BOOLEAN",
        }
    }

    /// Width in bits for integer kinds
    pub fn int_bits(self) -> Option<u8> {
        match self {
            FieldKind::SmallInt => Some(16),
            FieldKind::Int => Some(32),
            FieldKind::BigInt => Some(64),
            _ => None,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Categorical)
    }

    /// Whether values of `self` can be stored in a column of kind `other`
    pub fn is_compatible_with(self, other: FieldKind) -> bool {
        if self == other || (self.is_textual() && other.is_textual()) {
            return true;
        }
        match (self.int_bits(), other.int_bits()) {
            (Some(from), Some(to)) => from <= to,
            _ => false,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Categorical => "categorical",
            FieldKind::SmallInt => "smallint",
            FieldKind::Int => "int",
            FieldKind::BigInt => "bigint",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Table Definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub primary_key: bool,
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    /// Nullable column with no constraints
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            primary_key: false,
            references: None,
        }
    }

    /// Mark as part of the primary key (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// A destination table: ordered columns plus key constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Columns carrying a foreign key, with their position in the row
    pub fn foreign_keys(&self) -> impl Iterator<Item = (usize, &ColumnDef, &ForeignKey)> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.references.as_ref().map(|fk| (i, c, fk)))
    }

    /// Tables this one references, excluding itself, in column order
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for (_, _, fk) in self.foreign_keys() {
            if fk.table != self.name && !tables.contains(&fk.table.as_str()) {
                tables.push(fk.table.as_str());
            }
        }
        tables
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for Postgres
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.kind.sql_type());
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        let pk: Vec<String> = self
            .primary_key()
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect();
        if !pk.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        for (_, column, fk) in self.foreign_keys() {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&column.name),
                quote_ident(&fk.table),
                quote_ident(&fk.column)
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&self.name),
            parts.join(",\n    ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(&self.name))
    }

    /// Check that a row fits this table: arity, nullability and value kinds
    pub fn check_row(&self, row: &RelationRow) -> std::result::Result<(), String> {
        if row.len() != self.columns.len() {
            return Err(format!(
                "{} expects {} columns, row has {}",
                self.name,
                self.columns.len(),
                row.len()
            ));
        }

        for (column, value) in self.columns.iter().zip(row.values()) {
            let ok = match (column.kind, value) {
                (_, Value::Null) => column.nullable,
                (kind, Value::Text(_)) => kind.is_textual(),
                (FieldKind::Float, Value::Int(_) | Value::Float(_)) => true,
                (FieldKind::SmallInt, Value::Int(n)) => i16::try_from(*n).is_ok(),
                (FieldKind::Int, Value::Int(n)) => i32::try_from(*n).is_ok(),
                (FieldKind::BigInt, Value::Int(_)) => true,
                (FieldKind::Boolean, Value::Bool(_)) => true,
                _ => false,
            };
            if !ok {
                return Err(format!(
                    "{}.{} ({}, {}) cannot hold {:?}",
                    self.name,
                    column.name,
                    column.kind,
                    if column.nullable { "nullable" } else { "not null" },
                    value
                ));
            }
        }
        Ok(())
    }
}

/// Quote a Postgres identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ============================================================================
// Schema Registry
// ============================================================================

/// Ordered set of destination tables
///
/// Declaration order is creation order. A table may only reference tables
/// declared before it, so creating in order and dropping in reverse never
/// trips a foreign key.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, validating its keys against what is already declared
    pub fn declare(&mut self, table: TableSchema) -> Result<()> {
        if self.get(&table.name).is_some() {
            return Err(IngestError::Schema(format!(
                "table {} declared twice",
                table.name
            )));
        }
        if table.columns.is_empty() {
            return Err(IngestError::Schema(format!("table {} has no columns", table.name)));
        }
        if table.primary_key().is_empty() {
            return Err(IngestError::Schema(format!(
                "table {} has no primary key",
                table.name
            )));
        }

        for (i, column) in table.columns.iter().enumerate() {
            if table.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(IngestError::Schema(format!(
                    "column {}.{} declared twice",
                    table.name, column.name
                )));
            }
        }

        for (_, column, fk) in table.foreign_keys() {
            let target = self.get(&fk.table).ok_or_else(|| {
                IngestError::Schema(format!(
                    "{}.{} references {} which is not declared before it",
                    table.name, column.name, fk.table
                ))
            })?;
            let target_column = target.column(&fk.column).ok_or_else(|| {
                IngestError::Schema(format!(
                    "{}.{} references unknown column {}.{}",
                    table.name, column.name, fk.table, fk.column
                ))
            })?;
            if !column.kind.is_compatible_with(target_column.kind) {
                return Err(IngestError::Schema(format!(
                    "{}.{} ({}) cannot reference {}.{} ({})",
                    table.name,
                    column.name,
                    column.kind,
                    fk.table,
                    fk.column,
                    target_column.kind
                )));
            }
        }

        debug!(table = %table.name, columns = table.columns.len(), "Declared table");
        self.tables.push(table);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Lookup that fails with a schema error for unknown tables
    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        self.get(name)
            .ok_or_else(|| IngestError::Schema(format!("unknown table {}", name)))
    }

    /// Tables in declaration order
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Registry holding only the tables named in `names`, in declaration order
    pub fn subset(&self, names: &[&str]) -> SchemaRegistry {
        Self {
            tables: self
                .tables
                .iter()
                .filter(|t| names.contains(&t.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Create every table in declaration order
    ///
    /// With `toggle_fk_checks` the sink's referential checks are switched off
    /// for the duration and switched back on afterwards, also when a create
    /// fails.
    pub async fn create_all<S>(&self, sink: &mut S, toggle_fk_checks: bool) -> Result<()>
    where
        S: RelationalSink + ?Sized,
    {
        info!("Creating {} tables", self.tables.len());

        if toggle_fk_checks {
            sink.set_foreign_key_checks(false).await?;
        }

        let mut outcome = Ok(());
        for table in &self.tables {
            if let Err(e) = sink.create_table(table).await {
                outcome = Err(e);
                break;
            }
        }

        if toggle_fk_checks {
            sink.set_foreign_key_checks(true).await?;
        }
        outcome
    }

    /// Drop every table in reverse declaration order
    pub async fn drop_all<S>(&self, sink: &mut S, toggle_fk_checks: bool) -> Result<()>
    where
        S: RelationalSink + ?Sized,
    {
        info!("Dropping {} tables", self.tables.len());

        if toggle_fk_checks {
            sink.set_foreign_key_checks(false).await?;
        }

        let mut outcome = Ok(());
        for table in self.tables.iter().rev() {
            if let Err(e) = sink.drop_table(table).await {
                outcome = Err(e);
                break;
            }
        }

        if toggle_fk_checks {
            sink.set_foreign_key_checks(true).await?;
        }
        outcome
    }

    // ========================================================================
    // IMDb tables
    // ========================================================================

    /// The eleven IMDb tables: two roots and nine tables that reference them
    pub fn imdb() -> Result<Self> {
        use FieldKind::*;

        let person = |name: &str| ColumnDef::new(name, Text).references(NAME_BASICS, "nconst");
        let title = |name: &str| ColumnDef::new(name, Text).references(TITLE_BASICS, "tconst");

        let mut registry = Self::new();

        registry.declare(TableSchema::new(
            NAME_BASICS,
            vec![
                ColumnDef::new("nconst", Text).primary_key(),
                ColumnDef::new("primary_name", Text),
                ColumnDef::new("birth_year", SmallInt),
                ColumnDef::new("death_year", SmallInt),
            ],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_BASICS,
            vec![
                ColumnDef::new("tconst", Text).primary_key(),
                ColumnDef::new("title_type", Categorical),
                ColumnDef::new("primary_title", Text),
                ColumnDef::new("original_title", Text),
                ColumnDef::new("is_adult", Boolean),
                ColumnDef::new("start_year", SmallInt),
                ColumnDef::new("end_year", SmallInt),
                ColumnDef::new("runtime_minutes", Int),
            ],
        ))?;

        registry.declare(TableSchema::new(
            NAME_PRIMARY_PROFESSIONS,
            vec![
                person("nconst").primary_key(),
                ColumnDef::new("profession", Categorical).primary_key(),
            ],
        ))?;

        registry.declare(TableSchema::new(
            NAME_KNOWN_FOR_TITLES,
            vec![person("nconst").primary_key(), title("tconst").primary_key()],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_WRITERS,
            vec![title("tconst").primary_key(), person("nconst").primary_key()],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_DIRECTORS,
            vec![title("tconst").primary_key(), person("nconst").primary_key()],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_GENRES,
            vec![
                title("tconst").primary_key(),
                ColumnDef::new("genre", Categorical).primary_key(),
            ],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_PRINCIPALS,
            vec![
                title("tconst").primary_key(),
                ColumnDef::new("ordering", Int).primary_key(),
                person("nconst"),
                ColumnDef::new("category", Categorical),
                ColumnDef::new("job", Text),
                ColumnDef::new("characters", Text),
            ],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_RATINGS,
            vec![
                title("tconst").primary_key(),
                ColumnDef::new("average_rating", Float),
                ColumnDef::new("num_votes", Int),
            ],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_AKAS,
            vec![
                title("tconst").primary_key(),
                ColumnDef::new("ordering", Int).primary_key(),
                ColumnDef::new("title", Text),
                ColumnDef::new("region", Categorical),
                ColumnDef::new("language", Categorical),
                ColumnDef::new("is_original_title", Boolean),
            ],
        ))?;

        registry.declare(TableSchema::new(
            TITLE_EPISODES,
            vec![
                title("tconst").primary_key(),
                title("parent_tconst").primary_key(),
                ColumnDef::new("season_number", Int),
                ColumnDef::new("episode_number", Int),
            ],
        ))?;

        Ok(registry)
    }
}

pub const NAME_BASICS: &str = "name_basics";
pub const TITLE_BASICS: &str = "title_basics";
pub const NAME_PRIMARY_PROFESSIONS: &str = "name_primary_professions";
pub const NAME_KNOWN_FOR_TITLES: &str = "name_known_for_titles";
pub const TITLE_WRITERS: &str = "title_writers";
pub const TITLE_DIRECTORS: &str = "title_directors";
pub const TITLE_GENRES: &str = "title_genres";
pub const TITLE_PRINCIPALS: &str = "title_principals";
pub const TITLE_RATINGS: &str = "title_ratings";
pub const TITLE_AKAS: &str = "title_akas";
pub const TITLE_EPISODES: &str = "title_episodes";
