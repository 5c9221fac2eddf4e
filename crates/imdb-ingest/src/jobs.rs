// Load jobs: one per destination table, ordered by foreign-key dependencies

use std::collections::{HashMap, VecDeque};

use crate::error::{IngestError, Result};
use crate::normalize::Projection;
use crate::schema::{self, SchemaRegistry};
use crate::source::Dataset;

/// How one table is filled from one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub table: &'static str,
    pub dataset: Dataset,
    /// `(source column, destination column)` in destination column order
    pub columns: Vec<(&'static str, &'static str)>,
    /// Source column split into one row per list element
    pub explode: Option<&'static str>,
}

impl LoadJob {
    pub fn new(
        table: &'static str,
        dataset: Dataset,
        columns: Vec<(&'static str, &'static str)>,
    ) -> Self {
        Self {
            table,
            dataset,
            columns,
            explode: None,
        }
    }

    pub fn exploding(mut self, column: &'static str) -> Self {
        self.explode = Some(column);
        self
    }

    pub fn projection(&self) -> Result<Projection> {
        Projection::new(self.dataset, &self.columns, self.explode)
    }

    /// Build the projection and check it against the destination table
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<Projection> {
        let table = registry.table(self.table)?;
        let projection = self.projection()?;
        projection.check_against(self.dataset, table)?;
        Ok(projection)
    }
}

/// The eleven IMDb load jobs in declaration order
pub fn imdb_jobs() -> Vec<LoadJob> {
    vec![
        LoadJob::new(
            schema::NAME_BASICS,
            Dataset::NameBasics,
            vec![
                ("nconst", "nconst"),
                ("primaryName", "primary_name"),
                ("birthYear", "birth_year"),
                ("deathYear", "death_year"),
            ],
        ),
        LoadJob::new(
            schema::TITLE_BASICS,
            Dataset::TitleBasics,
            vec![
                ("tconst", "tconst"),
                ("titleType", "title_type"),
                ("primaryTitle", "primary_title"),
                ("originalTitle", "original_title"),
                ("isAdult", "is_adult"),
                ("startYear", "start_year"),
                ("endYear", "end_year"),
                ("runtimeMinutes", "runtime_minutes"),
            ],
        ),
        LoadJob::new(
            schema::NAME_PRIMARY_PROFESSIONS,
            Dataset::NameBasics,
            vec![("nconst", "nconst"), ("primaryProfession", "profession")],
        )
        .exploding("primaryProfession"),
        LoadJob::new(
            schema::NAME_KNOWN_FOR_TITLES,
            Dataset::NameBasics,
            vec![("nconst", "nconst"), ("knownForTitles", "tconst")],
        )
        .exploding("knownForTitles"),
        LoadJob::new(
            schema::TITLE_WRITERS,
            Dataset::TitleCrew,
            vec![("tconst", "tconst"), ("writers", "nconst")],
        )
        .exploding("writers"),
        LoadJob::new(
            schema::TITLE_DIRECTORS,
            Dataset::TitleCrew,
            vec![("tconst", "tconst"), ("directors", "nconst")],
        )
        .exploding("directors"),
        LoadJob::new(
            schema::TITLE_GENRES,
            Dataset::TitleBasics,
            vec![("tconst", "tconst"), ("genres", "genre")],
        )
        .exploding("genres"),
        LoadJob::new(
            schema::TITLE_PRINCIPALS,
            Dataset::TitlePrincipals,
            vec![
                ("tconst", "tconst"),
                ("ordering", "ordering"),
                ("nconst", "nconst"),
                ("category", "category"),
                ("job", "job"),
                ("characters", "characters"),
            ],
        ),
        LoadJob::new(
            schema::TITLE_RATINGS,
            Dataset::TitleRatings,
            vec![
                ("tconst", "tconst"),
                ("averageRating", "average_rating"),
                ("numVotes", "num_votes"),
            ],
        ),
        LoadJob::new(
            schema::TITLE_AKAS,
            Dataset::TitleAkas,
            vec![
                ("titleId", "tconst"),
                ("ordering", "ordering"),
                ("title", "title"),
                ("region", "region"),
                ("language", "language"),
                ("isOriginalTitle", "is_original_title"),
            ],
        ),
        LoadJob::new(
            schema::TITLE_EPISODES,
            Dataset::TitleEpisode,
            vec![
                ("tconst", "tconst"),
                ("parentTconst", "parent_tconst"),
                ("seasonNumber", "season_number"),
                ("episodeNumber", "episode_number"),
            ],
        ),
    ]
}

/// Order jobs so every table loads after the tables it references
///
/// Only dependencies between the given jobs are considered; a referenced
/// table with no job here is assumed to be loaded already. Among jobs that
/// are ready at the same time, the given order is kept.
pub fn order_jobs<'a>(jobs: &'a [LoadJob], registry: &SchemaRegistry) -> Result<Vec<&'a LoadJob>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(jobs.len());
    for (i, job) in jobs.iter().enumerate() {
        registry.table(job.table)?;
        if index.insert(job.table, i).is_some() {
            return Err(IngestError::Dependency(format!(
                "table {} has more than one load job",
                job.table
            )));
        }
    }

    let mut pending = vec![0usize; jobs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];
    for (i, job) in jobs.iter().enumerate() {
        let table = registry.table(job.table)?;
        for referenced in table.referenced_tables() {
            if let Some(&j) = index.get(referenced) {
                pending[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..jobs.len()).filter(|&i| pending[i] == 0).collect();
    let mut ordered = Vec::with_capacity(jobs.len());

    while let Some(i) = ready.pop_front() {
        ordered.push(&jobs[i]);
        let mut released: Vec<usize> = Vec::new();
        for &d in &dependents[i] {
            pending[d] -= 1;
            if pending[d] == 0 {
                released.push(d);
            }
        }
        released.sort_unstable();
        ready.extend(released);
    }

    if ordered.len() != jobs.len() {
        let stuck: Vec<&str> = jobs
            .iter()
            .enumerate()
            .filter(|(i, _)| pending[*i] > 0)
            .map(|(_, job)| job.table)
            .collect();
        return Err(IngestError::Dependency(format!(
            "cyclic foreign keys between {}",
            stuck.join(", ")
        )));
    }

    Ok(ordered)
}
