// Normalization: project typed records onto relation rows, exploding
// comma-separated list columns into one row per element

use crate::coercion::Value;
use crate::error::{IngestError, Result};
use crate::schema::TableSchema;
use crate::source::Dataset;

/// Separator used by list-valued columns in the dumps
pub const LIST_SEPARATOR: char = ',';

/// A source record after coercion, in declared-column order
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    values: Vec<Value>,
}

impl TypedRecord {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// One row destined for a table, in the table's column order
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRow {
    values: Vec<Value>,
}

impl RelationRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// One kept column: where it comes from and what it is called downstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
    index: usize,
}

/// Which source columns become which destination columns
///
/// Output order is mapping order. Renames are purely a naming concern and
/// take effect after selection and explosion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    columns: Vec<ColumnMapping>,
    explode: Option<usize>,
}

impl Projection {
    /// Build a projection over `dataset`'s declared columns
    ///
    /// `mappings` are `(source, target)` pairs. `explode` names a source
    /// column that must be one of the mapped, textual columns.
    pub fn new(dataset: Dataset, mappings: &[(&str, &str)], explode: Option<&str>) -> Result<Self> {
        let mut columns = Vec::with_capacity(mappings.len());
        for (source, target) in mappings {
            let (index, _) = dataset.column(source).ok_or_else(|| {
                IngestError::Schema(format!("{} has no column {}", dataset, source))
            })?;
            if columns.iter().any(|c: &ColumnMapping| c.target == *target) {
                return Err(IngestError::Schema(format!(
                    "target column {} mapped twice",
                    target
                )));
            }
            columns.push(ColumnMapping {
                source: source.to_string(),
                target: target.to_string(),
                index,
            });
        }

        let explode = match explode {
            None => None,
            Some(name) => {
                let position = columns.iter().position(|c| c.source == name).ok_or_else(|| {
                    IngestError::Schema(format!("explode column {} is not projected", name))
                })?;
                let kind = dataset.columns()[columns[position].index].kind;
                if !kind.is_textual() {
                    return Err(IngestError::Schema(format!(
                        "explode column {} is {}, expected text",
                        name, kind
                    )));
                }
                Some(position)
            }
        };

        Ok(Self { columns, explode })
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    /// Destination column names in output order
    pub fn targets(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.target.as_str()).collect()
    }

    pub fn explode_column(&self) -> Option<&str> {
        self.explode.map(|i| self.columns[i].source.as_str())
    }

    /// Check the projection lines up with `table`, name for name and kind for kind
    pub fn check_against(&self, dataset: Dataset, table: &TableSchema) -> Result<()> {
        let targets = self.targets();
        if targets != table.column_names() {
            return Err(IngestError::Schema(format!(
                "projection {:?} does not match {} columns {:?}",
                targets,
                table.name,
                table.column_names()
            )));
        }

        for (mapping, column) in self.columns.iter().zip(&table.columns) {
            let kind = dataset.columns()[mapping.index].kind;
            if !kind.is_compatible_with(column.kind) {
                return Err(IngestError::Schema(format!(
                    "{}.{} is {} but {}.{} is {}",
                    dataset, mapping.source, kind, table.name, column.name, column.kind
                )));
            }
        }
        Ok(())
    }
}

/// Turn one typed record into zero or more relation rows
///
/// Without an explode column this yields exactly one row. With one, the
/// field is split on commas; empty elements are dropped, duplicates within
/// the record are emitted once, and a null or empty field yields no rows.
pub fn normalize(record: &TypedRecord, projection: &Projection) -> Vec<RelationRow> {
    let base: Vec<Value> = projection
        .columns
        .iter()
        .map(|c| record.get(c.index).cloned().unwrap_or(Value::Null))
        .collect();

    let Some(position) = projection.explode else {
        return vec![RelationRow::new(base)];
    };

    let elements: Vec<&str> = match &base[position] {
        Value::Text(list) => {
            let mut seen: Vec<&str> = Vec::new();
            for element in list.split(LIST_SEPARATOR).map(str::trim) {
                if !element.is_empty() && !seen.contains(&element) {
                    seen.push(element);
                }
            }
            seen
        }
        _ => Vec::new(),
    };

    elements
        .into_iter()
        .map(|element| {
            let mut values = base.clone();
            values[position] = Value::Text(element.to_string());
            RelationRow::new(values)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{SchemaRegistry, TITLE_BASICS, TITLE_GENRES};

    fn title(tconst: &str, genres: Value) -> TypedRecord {
        let mut values = vec![Value::Null; Dataset::TitleBasics.columns().len()];
        values[0] = Value::Text(tconst.into());
        values[8] = genres;
        TypedRecord::new(values)
    }

    fn genres_projection() -> Projection {
        Projection::new(
            Dataset::TitleBasics,
            &[("tconst", "tconst"), ("genres", "genre")],
            Some("genres"),
        )
        .unwrap()
    }

    fn texts(rows: &[RelationRow], column: usize) -> Vec<String> {
        rows.iter()
            .map(|r| r.get(column).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_explode_list() {
        let rows = normalize(&title("tt1", "Drama,Comedy".into()), &genres_projection());
        assert_eq!(rows.len(), 2);
        assert_eq!(texts(&rows, 0), vec!["tt1", "tt1"]);
        assert_eq!(texts(&rows, 1), vec!["Drama", "Comedy"]);
    }

    #[test]
    fn test_explode_empty_and_null_yield_nothing() {
        let projection = genres_projection();
        assert!(normalize(&title("tt1", "".into()), &projection).is_empty());
        assert!(normalize(&title("tt1", Value::Null), &projection).is_empty());
        assert!(normalize(&title("tt1", ",,".into()), &projection).is_empty());
    }

    #[test]
    fn test_explode_drops_duplicates_and_blanks() {
        let rows = normalize(
            &title("tt1", "Drama,,Drama,Horror".into()),
            &genres_projection(),
        );
        assert_eq!(texts(&rows, 1), vec!["Drama", "Horror"]);
    }

    #[test]
    fn test_explode_trims_elements() {
        let rows = normalize(
            &title("tt1", "Drama, Comedy , ,Drama".into()),
            &genres_projection(),
        );
        assert_eq!(texts(&rows, 1), vec!["Drama", "Comedy"]);
    }

    #[test]
    fn test_without_explode_one_row() {
        let projection = Projection::new(
            Dataset::TitleBasics,
            &[("tconst", "tconst"), ("genres", "genre")],
            None,
        )
        .unwrap();
        let rows = normalize(&title("tt1", "Drama,Comedy".into()), &projection);
        assert_eq!(rows.len(), 1);
        assert_eq!(texts(&rows, 1), vec!["Drama,Comedy"]);
    }

    #[test]
    fn test_projection_rejects_unknown_column() {
        let err = Projection::new(Dataset::TitleCrew, &[("genres", "genre")], None).unwrap_err();
        assert!(err.to_string().contains("genres"));
    }

    #[test]
    fn test_projection_rejects_numeric_explode() {
        let result = Projection::new(
            Dataset::TitleBasics,
            &[("tconst", "tconst"), ("startYear", "start_year")],
            Some("startYear"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rename_applies_to_targets() {
        let projection = genres_projection();
        assert_eq!(projection.targets(), vec!["tconst", "genre"]);
        assert_eq!(projection.explode_column(), Some("genres"));

        let registry = SchemaRegistry::imdb().unwrap();
        projection
            .check_against(Dataset::TitleBasics, registry.table(TITLE_GENRES).unwrap())
            .unwrap();
        assert!(projection
            .check_against(Dataset::TitleBasics, registry.table(TITLE_BASICS).unwrap())
            .is_err());
    }
}
