// Pipeline driver: reset the schema, then run every load job in dependency order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::coercion::{IntegerPolicy, DEFAULT_NULL_SENTINEL};
use crate::error::{IngestError, Result};
use crate::fk_filter::{ForeignKeyCheck, KnownKeys};
use crate::jobs::{imdb_jobs, order_jobs, LoadJob};
use crate::loader::{count_lines, load, LoadContext, LoadReport, Transform, DEFAULT_CHUNK_SIZE};
use crate::progress::{create_load_progress, create_spinner};
use crate::schema::{ForeignKey, SchemaRegistry};
use crate::sink::RelationalSink;
use crate::source::Dataset;

/// What to do when a job fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop at the first failed job; later jobs are reported as skipped
    FailFast,
    /// Log the failure and carry on with the remaining jobs
    #[default]
    BestEffort,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(ErrorPolicy::FailFast),
            "best_effort" => Ok(ErrorPolicy::BestEffort),
            other => Err(format!(
                "unknown error policy '{}', expected fail-fast or best-effort",
                other
            )),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::FailFast => f.write_str("fail-fast"),
            ErrorPolicy::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// Settings for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub null_sentinel: String,
    pub integer_policy: IntegerPolicy,
    pub row_limit: Option<u64>,
    pub error_policy: ErrorPolicy,
    /// Disable referential checks around the drop and create steps
    pub toggle_fk_checks: bool,
    /// Drop and recreate the tables before loading
    pub reset_schema: bool,
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tsv_dump"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            null_sentinel: DEFAULT_NULL_SENTINEL.to_string(),
            integer_policy: IntegerPolicy::default(),
            row_limit: None,
            error_policy: ErrorPolicy::default(),
            toggle_fk_checks: true,
            reset_schema: true,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of one load job
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub table: String,
    pub source: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<LoadReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Result of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_policy: ErrorPolicy,
    pub outcomes: Vec<JobOutcome>,
    /// Rows per table after the run
    pub row_counts: BTreeMap<String, u64>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == JobStatus::Succeeded)
    }

    pub fn failed(&self) -> Vec<&JobOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == JobStatus::Failed)
            .collect()
    }

    pub fn rows_appended(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.report.as_ref())
            .map(|r| r.rows_appended)
            .sum()
    }
}

/// Runs a set of load jobs against one sink
pub struct Pipeline {
    registry: SchemaRegistry,
    jobs: Vec<LoadJob>,
    options: PipelineOptions,
}

impl Pipeline {
    /// Validate every job against `registry` and their dependency order
    pub fn new(registry: SchemaRegistry, jobs: Vec<LoadJob>, options: PipelineOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            return Err(IngestError::Config("chunk size must be positive".to_string()));
        }
        for job in &jobs {
            job.validate(&registry)?;
        }
        order_jobs(&jobs, &registry)?;

        Ok(Self {
            registry,
            jobs,
            options,
        })
    }

    /// All eleven IMDb tables
    pub fn imdb(options: PipelineOptions) -> Result<Self> {
        Self::new(SchemaRegistry::imdb()?, imdb_jobs(), options)
    }

    /// Keep only the jobs for `tables`
    pub fn only(mut self, tables: &[String]) -> Result<Self> {
        if tables.is_empty() {
            return Ok(self);
        }
        for name in tables {
            if !self.jobs.iter().any(|j| j.table == name.as_str()) {
                return Err(IngestError::Config(format!("no load job for table {}", name)));
            }
        }
        self.jobs.retain(|j| tables.iter().any(|t| t.as_str() == j.table));
        Ok(self)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn jobs(&self) -> &[LoadJob] {
        &self.jobs
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Source files the selected jobs read, without duplicates
    pub fn datasets(&self) -> Vec<Dataset> {
        let mut datasets: Vec<Dataset> = Vec::new();
        for job in &self.jobs {
            if !datasets.contains(&job.dataset) {
                datasets.push(job.dataset);
            }
        }
        datasets
    }

    /// Reset the selected tables, then load them
    ///
    /// Schema errors abort the run. Job errors are recorded in the report
    /// and handled according to the error policy.
    pub async fn run<S>(&self, sink: &mut S) -> Result<RunReport>
    where
        S: RelationalSink + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            jobs = self.jobs.len(),
            policy = %self.options.error_policy,
            "Starting IMDb load"
        );

        if self.options.reset_schema {
            self.reset_schema(sink).await?;
        }

        let ordered = order_jobs(&self.jobs, &self.registry)?;
        let mut known_keys: HashMap<(String, String), Arc<KnownKeys>> = HashMap::new();
        let mut outcomes = Vec::with_capacity(ordered.len());
        let mut halted = false;

        for job in ordered {
            if halted {
                outcomes.push(JobOutcome {
                    table: job.table.to_string(),
                    source: job.dataset.file_name(),
                    status: JobStatus::Skipped,
                    report: None,
                    error: None,
                    elapsed_ms: 0,
                });
                continue;
            }

            let span = info_span!("load_job", table = job.table, source = %job.dataset);
            let started = Instant::now();
            let result = self
                .run_job(job, sink, &mut known_keys)
                .instrument(span)
                .await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(report) => outcomes.push(JobOutcome {
                    table: job.table.to_string(),
                    source: job.dataset.file_name(),
                    status: JobStatus::Succeeded,
                    report: Some(report),
                    error: None,
                    elapsed_ms,
                }),
                Err(e) => {
                    error!("Load of {} failed: {}", job.table, e);
                    outcomes.push(JobOutcome {
                        table: job.table.to_string(),
                        source: job.dataset.file_name(),
                        status: JobStatus::Failed,
                        report: None,
                        error: Some(e.to_string()),
                        elapsed_ms,
                    });
                    if self.options.error_policy == ErrorPolicy::FailFast {
                        warn!("Fail-fast policy: skipping remaining jobs");
                        halted = true;
                    }
                }
            }
        }

        let mut row_counts = BTreeMap::new();
        for job in &self.jobs {
            let table = self.registry.table(job.table)?;
            match sink.row_count(table).await {
                Ok(count) => {
                    row_counts.insert(table.name.clone(), count);
                }
                Err(e) => warn!("Could not count rows in {}: {}", table.name, e),
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            error_policy: self.options.error_policy,
            outcomes,
            row_counts,
        };

        info!(
            %run_id,
            succeeded = report.succeeded(),
            rows = report.rows_appended(),
            "IMDb load finished"
        );
        Ok(report)
    }

    /// Drop the selected tables, then create every table that is missing
    async fn reset_schema<S>(&self, sink: &mut S) -> Result<()>
    where
        S: RelationalSink + ?Sized,
    {
        let selected: Vec<&str> = self.jobs.iter().map(|j| j.table).collect();
        let scope = self.registry.subset(&selected);

        scope.drop_all(sink, self.options.toggle_fk_checks).await?;
        self.registry
            .create_all(sink, self.options.toggle_fk_checks)
            .await
    }

    async fn run_job<S>(
        &self,
        job: &LoadJob,
        sink: &mut S,
        known_keys: &mut HashMap<(String, String), Arc<KnownKeys>>,
    ) -> Result<LoadReport>
    where
        S: RelationalSink + ?Sized,
    {
        let path = job.dataset.path_in(&self.options.data_dir);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(IngestError::SourceMissing(path));
        }

        let table = self.registry.table(job.table)?;
        let mut transform = Transform::new(job.validate(&self.registry)?);

        for (_, column, fk) in table.foreign_keys() {
            let keys = self.known_keys(sink, fk, known_keys).await?;
            transform = transform.with_foreign_key(ForeignKeyCheck::new(table, &column.name, keys)?);
        }

        let spinner = create_spinner(
            &format!("Counting lines in {}", job.dataset.file_name()),
            self.options.show_progress,
        );
        let mut total = count_lines(&path).await?;
        spinner.finish_and_clear();
        if let Some(limit) = self.options.row_limit {
            total = total.min(limit);
        }

        info!("Loading {} from {} ({} lines)", job.table, path.display(), total);

        let progress = create_load_progress(total, job.table, self.options.show_progress);
        let ctx = LoadContext {
            chunk_size: self.options.chunk_size,
            null_sentinel: self.options.null_sentinel.clone(),
            integer_policy: self.options.integer_policy,
            row_limit: self.options.row_limit,
            progress: progress.clone(),
        };

        let file = tokio::fs::File::open(&path).await?;
        let result = load(file, job.dataset, table, &transform, sink, &ctx).await;
        progress.finish_and_clear();
        result
    }

    /// Key set for a referenced column, fetched once per run
    async fn known_keys<S>(
        &self,
        sink: &mut S,
        fk: &ForeignKey,
        cache: &mut HashMap<(String, String), Arc<KnownKeys>>,
    ) -> Result<Arc<KnownKeys>>
    where
        S: RelationalSink + ?Sized,
    {
        let cache_key = (fk.table.clone(), fk.column.clone());
        if let Some(keys) = cache.get(&cache_key) {
            return Ok(Arc::clone(keys));
        }

        let referenced = self.registry.table(&fk.table)?;
        let keys = Arc::new(sink.fetch_keys(referenced, &fk.column).await?);
        info!("Fetched {} known keys from {}.{}", keys.len(), fk.table, fk.column);

        cache.insert(cache_key, Arc::clone(&keys));
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{NAME_BASICS, TITLE_BASICS, TITLE_GENRES, TITLE_RATINGS};
    use crate::sink::MemorySink;
    use std::path::Path;

    fn write(dir: &Path, dataset: Dataset, contents: &str) {
        std::fs::write(dataset.path_in(dir), contents).unwrap();
    }

    fn options(dir: &Path) -> PipelineOptions {
        PipelineOptions {
            data_dir: dir.to_path_buf(),
            chunk_size: 2,
            ..PipelineOptions::default()
        }
    }

    const TITLES: &str = "tconst\ttitleType\tprimaryTitle\toriginalTitle\tisAdult\tstartYear\tendYear\truntimeMinutes\tgenres\n\
tt1\tmovie\tOne\tOne\t0\t1990\t\\N\t90\tDrama,Comedy\n\
tt2\tmovie\tTwo\tTwo\t0\t1991\t\\N\t\\N\t\n\
tt3\tshort\tThree\tThree\t1\t1992\t\\N\t7\tHorror\n";

    #[test]
    fn test_error_policy_from_str() {
        assert_eq!("fail-fast".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::FailFast);
        assert_eq!("BEST_EFFORT".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::BestEffort);
        assert!("sometimes".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::BestEffort);
    }

    #[test]
    fn test_only_rejects_unknown_table() {
        let pipeline = Pipeline::imdb(PipelineOptions::default()).unwrap();
        assert!(pipeline.only(&["title_trivia".to_string()]).is_err());
    }

    #[test]
    fn test_datasets_are_deduplicated() {
        let pipeline = Pipeline::imdb(PipelineOptions::default()).unwrap();
        assert_eq!(pipeline.datasets().len(), 7);

        let pipeline = pipeline
            .only(&[TITLE_BASICS.to_string(), TITLE_GENRES.to_string()])
            .unwrap();
        assert_eq!(pipeline.datasets(), vec![Dataset::TitleBasics]);
    }

    #[tokio::test]
    async fn test_missing_source_fails_job_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), Dataset::TitleBasics, TITLES);

        let pipeline = Pipeline::imdb(options(dir.path()))
            .unwrap()
            .only(&[
                TITLE_BASICS.to_string(),
                TITLE_GENRES.to_string(),
                TITLE_RATINGS.to_string(),
            ])
            .unwrap();
        let mut sink = MemorySink::new();
        let report = pipeline.run(&mut sink).await.unwrap();

        assert!(!report.succeeded());
        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].table, TITLE_RATINGS);
        assert!(failed[0].error.as_deref().unwrap().contains("title.ratings.tsv"));

        assert_eq!(report.row_counts[TITLE_BASICS], 3);
        assert_eq!(report.row_counts[TITLE_GENRES], 3);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_remaining_jobs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), Dataset::TitleBasics, TITLES);

        let opts = PipelineOptions {
            error_policy: ErrorPolicy::FailFast,
            ..options(dir.path())
        };
        let pipeline = Pipeline::imdb(opts)
            .unwrap()
            .only(&[NAME_BASICS.to_string(), TITLE_BASICS.to_string()])
            .unwrap();
        let mut sink = MemorySink::new();
        let report = pipeline.run(&mut sink).await.unwrap();

        let statuses: Vec<JobStatus> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![JobStatus::Failed, JobStatus::Skipped]);
    }

    #[tokio::test]
    async fn test_sink_failure_is_isolated_to_its_job() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), Dataset::TitleBasics, TITLES);
        write(
            dir.path(),
            Dataset::TitleRatings,
            "tconst\taverageRating\tnumVotes\ntt1\t7.5\t120\n",
        );

        let pipeline = Pipeline::imdb(PipelineOptions {
            reset_schema: false,
            ..options(dir.path())
        })
        .unwrap()
        .only(&[
            TITLE_BASICS.to_string(),
            TITLE_GENRES.to_string(),
            TITLE_RATINGS.to_string(),
        ])
        .unwrap();

        let mut sink = MemorySink::new().fail_on(TITLE_GENRES);
        let registry = SchemaRegistry::imdb().unwrap();
        for name in [TITLE_BASICS, TITLE_RATINGS] {
            sink.create_table(registry.table(name).unwrap()).await.unwrap();
        }

        let report = pipeline.run(&mut sink).await.unwrap();
        let failed: Vec<&str> = report.failed().iter().map(|o| o.table.as_str()).collect();
        assert_eq!(failed, vec![TITLE_GENRES]);
        assert_eq!(sink.rows(TITLE_RATINGS).unwrap().len(), 1);
        assert_eq!(sink.rows(TITLE_BASICS).unwrap().len(), 3);
    }

    #[test]
    fn test_run_report_serializes() {
        let report = RunReport {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error_policy: ErrorPolicy::BestEffort,
            outcomes: vec![JobOutcome {
                table: TITLE_BASICS.to_string(),
                source: "title.basics.tsv".to_string(),
                status: JobStatus::Succeeded,
                report: Some(LoadReport::default()),
                error: None,
                elapsed_ms: 5,
            }],
            row_counts: BTreeMap::new(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["status"], "succeeded");
        assert_eq!(json["error_policy"], "best_effort");
        assert!(json["outcomes"][0].get("error").is_none());
    }
}
