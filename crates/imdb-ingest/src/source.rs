// Source dump files and their declared columns

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{IngestError, Result};
use crate::schema::FieldKind;

/// A column the loader reads from a source file
///
/// Columns present in the file but not declared here are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl SourceColumn {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Declared-column tokens of one data line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// 1-based line number in the file, header included
    pub line: u64,
    /// Raw tokens in declared-column order
    pub tokens: Vec<String>,
}

/// The seven published IMDb dump files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    NameBasics,
    TitleAkas,
    TitleBasics,
    TitleCrew,
    TitleEpisode,
    TitlePrincipals,
    TitleRatings,
}

use FieldKind::{Boolean, Categorical, Float, Int, SmallInt, Text};

const NAME_BASICS: &[SourceColumn] = &[
    SourceColumn::new("nconst", Text),
    SourceColumn::new("primaryName", Text),
    SourceColumn::new("birthYear", SmallInt),
    SourceColumn::new("deathYear", SmallInt),
    SourceColumn::new("primaryProfession", Text),
    SourceColumn::new("knownForTitles", Text),
];

const TITLE_AKAS: &[SourceColumn] = &[
    SourceColumn::new("titleId", Text),
    SourceColumn::new("ordering", Int),
    SourceColumn::new("title", Text),
    SourceColumn::new("region", Categorical),
    SourceColumn::new("language", Categorical),
    SourceColumn::new("isOriginalTitle", Boolean),
];

const TITLE_BASICS: &[SourceColumn] = &[
    SourceColumn::new("tconst", Text),
    SourceColumn::new("titleType", Categorical),
    SourceColumn::new("primaryTitle", Text),
    SourceColumn::new("originalTitle", Text),
    SourceColumn::new("isAdult", Boolean),
    SourceColumn::new("startYear", SmallInt),
    SourceColumn::new("endYear", SmallInt),
    SourceColumn::new("runtimeMinutes", Int),
    SourceColumn::new("genres", Text),
];

const TITLE_CREW: &[SourceColumn] = &[
    SourceColumn::new("tconst", Text),
    SourceColumn::new("directors", Text),
    SourceColumn::new("writers", Text),
];

const TITLE_EPISODE: &[SourceColumn] = &[
    SourceColumn::new("tconst", Text),
    SourceColumn::new("parentTconst", Text),
    SourceColumn::new("seasonNumber", Int),
    SourceColumn::new("episodeNumber", Int),
];

const TITLE_PRINCIPALS: &[SourceColumn] = &[
    SourceColumn::new("tconst", Text),
    SourceColumn::new("ordering", Int),
    SourceColumn::new("nconst", Text),
    SourceColumn::new("category", Categorical),
    SourceColumn::new("job", Text),
    SourceColumn::new("characters", Text),
];

const TITLE_RATINGS: &[SourceColumn] = &[
    SourceColumn::new("tconst", Text),
    SourceColumn::new("averageRating", Float),
    SourceColumn::new("numVotes", Int),
];

impl Dataset {
    pub const ALL: [Dataset; 7] = [
        Dataset::NameBasics,
        Dataset::TitleAkas,
        Dataset::TitleBasics,
        Dataset::TitleCrew,
        Dataset::TitleEpisode,
        Dataset::TitlePrincipals,
        Dataset::TitleRatings,
    ];

    /// Dotted stem, e.g. `title.basics`
    pub fn stem(self) -> &'static str {
        match self {
            Dataset::NameBasics => "name.basics",
            Dataset::TitleAkas => "title.akas",
            Dataset::TitleBasics => "title.basics",
            Dataset::TitleCrew => "title.crew",
            Dataset::TitleEpisode => "title.episode",
            Dataset::TitlePrincipals => "title.principals",
            Dataset::TitleRatings => "title.ratings",
        }
    }

    /// Decompressed file name
    pub fn file_name(self) -> String {
        format!("{}.tsv", self.stem())
    }

    /// Published archive name
    pub fn archive_name(self) -> String {
        format!("{}.tsv.gz", self.stem())
    }

    pub fn path_in(self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    pub fn columns(self) -> &'static [SourceColumn] {
        match self {
            Dataset::NameBasics => NAME_BASICS,
            Dataset::TitleAkas => TITLE_AKAS,
            Dataset::TitleBasics => TITLE_BASICS,
            Dataset::TitleCrew => TITLE_CREW,
            Dataset::TitleEpisode => TITLE_EPISODE,
            Dataset::TitlePrincipals => TITLE_PRINCIPALS,
            Dataset::TitleRatings => TITLE_RATINGS,
        }
    }

    pub fn column(self, name: &str) -> Option<(usize, &'static SourceColumn)> {
        self.columns()
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim_end_matches(".gz").trim_end_matches(".tsv");
        Dataset::ALL
            .into_iter()
            .find(|d| d.stem() == wanted || d.stem().replace('.', "_") == wanted)
            .ok_or_else(|| format!("unknown dataset '{}'", s))
    }
}

/// Position of each declared column within a file's header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    positions: Vec<usize>,
    header_len: usize,
}

impl SourceLayout {
    /// Resolve declared columns against a header row
    ///
    /// A declared column missing from the header is a schema error; extra
    /// header columns are fine.
    pub fn resolve<'h>(
        dataset: Dataset,
        header: impl IntoIterator<Item = &'h str>,
    ) -> Result<Self> {
        let header: Vec<&str> = header.into_iter().collect();
        let positions = dataset
            .columns()
            .iter()
            .map(|column| {
                header
                    .iter()
                    .position(|h| h.trim_start_matches('\u{feff}') == column.name)
                    .ok_or_else(|| {
                        IngestError::Schema(format!(
                            "{} header has no column {}",
                            dataset.file_name(),
                            column.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            positions,
            header_len: header.len(),
        })
    }

    /// Number of fields a well-formed line carries
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Pick declared-column tokens out of a full line
    pub fn extract<'r>(&self, fields: impl Fn(usize) -> Option<&'r str>, line: u64) -> SourceRecord {
        SourceRecord {
            line,
            tokens: self
                .positions
                .iter()
                .map(|&p| fields(p).unwrap_or_default().to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(Dataset::TitleBasics.file_name(), "title.basics.tsv");
        assert_eq!(Dataset::NameBasics.archive_name(), "name.basics.tsv.gz");
        assert_eq!(
            Dataset::TitleCrew.path_in(Path::new("/data")),
            PathBuf::from("/data/title.crew.tsv")
        );
    }

    #[test]
    fn test_dataset_from_str() {
        assert_eq!("title.akas".parse::<Dataset>().unwrap(), Dataset::TitleAkas);
        assert_eq!("title_ratings".parse::<Dataset>().unwrap(), Dataset::TitleRatings);
        assert_eq!("name.basics.tsv.gz".parse::<Dataset>().unwrap(), Dataset::NameBasics);
        assert!("title.trivia".parse::<Dataset>().is_err());
    }

    #[test]
    fn test_layout_ignores_extra_columns() {
        let header = ["tconst", "averageRating", "extra", "numVotes"];
        let layout = SourceLayout::resolve(Dataset::TitleRatings, header).unwrap();
        assert_eq!(layout.header_len(), 4);

        let line = ["tt0000001", "5.7", "ignored", "1990"];
        let record = layout.extract(|i| line.get(i).copied(), 2);
        assert_eq!(record.tokens, vec!["tt0000001", "5.7", "1990"]);
        assert_eq!(record.line, 2);
    }

    #[test]
    fn test_layout_missing_column() {
        let header = ["tconst", "averageRating"];
        let err = SourceLayout::resolve(Dataset::TitleRatings, header).unwrap_err();
        assert!(err.to_string().contains("numVotes"));
    }
}
