// Chunked loader: stream a TSV file through coercion, normalization and
// foreign-key filtering into a sink, one bounded chunk at a time

use csv_async::{AsyncReader, AsyncReaderBuilder, ErrorKind, StringRecord};
use indicatif::ProgressBar;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::coercion::{Coercer, IntegerPolicy, DEFAULT_NULL_SENTINEL};
use crate::error::{IngestError, Result};
use crate::fk_filter::ForeignKeyCheck;
use crate::normalize::{normalize, Projection, RelationRow};
use crate::schema::TableSchema;
use crate::sink::RelationalSink;
use crate::source::{Dataset, SourceLayout, SourceRecord};

/// Default number of source lines per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 5_000;

/// Settings shared by every chunk of one load
#[derive(Clone)]
pub struct LoadContext {
    pub chunk_size: usize,
    pub null_sentinel: String,
    pub integer_policy: IntegerPolicy,
    /// Stop after this many data lines
    pub row_limit: Option<u64>,
    pub progress: ProgressBar,
}

impl Default for LoadContext {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            null_sentinel: DEFAULT_NULL_SENTINEL.to_string(),
            integer_policy: IntegerPolicy::default(),
            row_limit: None,
            progress: ProgressBar::hidden(),
        }
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("chunk_size", &self.chunk_size)
            .field("null_sentinel", &self.null_sentinel)
            .field("integer_policy", &self.integer_policy)
            .field("row_limit", &self.row_limit)
            .finish_non_exhaustive()
    }
}

impl LoadContext {
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn coercer(&self) -> Coercer {
        Coercer::new(self.null_sentinel.clone(), self.integer_policy)
    }
}

/// Counters for one table load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Data lines consumed, header excluded
    pub lines_read: u64,
    /// Lines dropped for a wrong field count or invalid UTF-8
    pub malformed_skipped: u64,
    /// Records dropped by the integer policy
    pub coercion_skipped: u64,
    /// Rows produced by normalization, before filtering
    pub rows_normalized: u64,
    /// Rows dropped for referencing unknown keys
    pub fk_excluded: u64,
    pub rows_appended: u64,
    pub chunks: u64,
}

impl LoadReport {
    fn absorb(&mut self, chunk: &ChunkReport) {
        self.coercion_skipped += chunk.coercion_skipped;
        self.rows_normalized += chunk.rows_normalized;
        self.fk_excluded += chunk.fk_excluded;
        self.rows_appended += chunk.rows_appended;
        self.chunks += 1;
    }
}

#[derive(Debug, Default)]
struct ChunkReport {
    coercion_skipped: u64,
    rows_normalized: u64,
    fk_excluded: u64,
    rows_appended: u64,
}

// ============================================================================
// Chunked source
// ============================================================================

/// A batch of well-formed records plus what was consumed to get them
#[derive(Debug, Default)]
pub struct Chunk {
    pub records: Vec<SourceRecord>,
    /// Lines consumed for this chunk, malformed ones included
    pub lines: u64,
    pub malformed: u64,
}

/// Reads a dump file in chunks of at most `chunk_size` lines
///
/// Tabs separate fields and quote characters carry no meaning. Lines whose
/// field count differs from the header's, or that are not valid UTF-8, are
/// logged and skipped. I/O failures end the read.
pub struct ChunkedSource<R> {
    reader: AsyncReader<R>,
    dataset: Dataset,
    layout: SourceLayout,
    record: StringRecord,
    chunk_size: usize,
    row_limit: Option<u64>,
    lines_read: u64,
    exhausted: bool,
}

impl<R> ChunkedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Open a reader over `source` and resolve its header
    pub async fn open(
        source: R,
        dataset: Dataset,
        chunk_size: usize,
        row_limit: Option<u64>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IngestError::Config("chunk size must be positive".to_string()));
        }

        let mut reader = AsyncReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .has_headers(true)
            .create_reader(source);

        let header = reader.headers().await?.clone();
        let layout = SourceLayout::resolve(dataset, header.iter())?;

        Ok(Self {
            reader,
            dataset,
            layout,
            record: StringRecord::new(),
            chunk_size,
            row_limit,
            lines_read: 0,
            exhausted: false,
        })
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    fn limit_reached(&self) -> bool {
        matches!(self.row_limit, Some(limit) if self.lines_read >= limit)
    }

    /// Next chunk, or `None` once the file (or the row limit) is exhausted
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut chunk = Chunk::default();

        while chunk.lines < self.chunk_size as u64 {
            if self.limit_reached() {
                self.exhausted = true;
                break;
            }

            match self.reader.read_record(&mut self.record).await {
                Ok(false) => {
                    self.exhausted = true;
                    break;
                }
                Ok(true) => {
                    self.lines_read += 1;
                    chunk.lines += 1;
                    // Header is line 1
                    let line = self.lines_read + 1;

                    if self.record.len() != self.layout.header_len() {
                        warn!(
                            file = %self.dataset,
                            line,
                            fields = self.record.len(),
                            expected = self.layout.header_len(),
                            "Skipping malformed line"
                        );
                        chunk.malformed += 1;
                        continue;
                    }

                    let record = &self.record;
                    chunk.records.push(self.layout.extract(|i| record.get(i), line));
                }
                Err(e) => {
                    if matches!(e.kind(), ErrorKind::Io(_)) {
                        return Err(e.into());
                    }
                    self.lines_read += 1;
                    chunk.lines += 1;
                    chunk.malformed += 1;
                    warn!(file = %self.dataset, line = self.lines_read + 1, error = %e, "Skipping unreadable line");
                }
            }
        }

        if chunk.lines == 0 {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}

// ============================================================================
// Transform
// ============================================================================

/// Turns chunks of source records into rows for one table
#[derive(Debug, Clone)]
pub struct Transform {
    pub projection: Projection,
    pub foreign_keys: Vec<ForeignKeyCheck>,
}

/// Rows ready for the sink plus what was dropped on the way
#[derive(Debug, Default)]
pub struct TransformedChunk {
    pub rows: Vec<RelationRow>,
    pub coercion_skipped: u64,
    pub rows_normalized: u64,
    pub fk_excluded: u64,
}

impl Transform {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_foreign_key(mut self, check: ForeignKeyCheck) -> Self {
        self.foreign_keys.push(check);
        self
    }

    /// Coerce, normalize and filter one chunk
    pub fn apply(&self, chunk: &Chunk, dataset: Dataset, coercer: &Coercer) -> Result<TransformedChunk> {
        let mut out = TransformedChunk::default();

        for record in &chunk.records {
            match coercer.coerce_record(record, dataset.columns())? {
                Some(typed) => out.rows.extend(normalize(&typed, &self.projection)),
                None => out.coercion_skipped += 1,
            }
        }
        out.rows_normalized = out.rows.len() as u64;

        for check in &self.foreign_keys {
            let outcome = check.apply(std::mem::take(&mut out.rows));
            if outcome.excluded > 0 {
                debug!(
                    column = %check.column,
                    references = %check.references,
                    excluded = outcome.excluded,
                    "Dropped rows with unknown keys"
                );
            }
            out.fk_excluded += outcome.excluded as u64;
            out.rows = outcome.kept;
        }

        Ok(out)
    }
}

// ============================================================================
// Load
// ============================================================================

/// Load one table from `source`
///
/// Each chunk is appended with a single sink call, so a chunk is stored
/// completely or not at all. The first fatal error stops the load; chunks
/// appended before it stay in place.
pub async fn load<R, S>(
    source: R,
    dataset: Dataset,
    table: &TableSchema,
    transform: &Transform,
    sink: &mut S,
    ctx: &LoadContext,
) -> Result<LoadReport>
where
    R: AsyncRead + Unpin + Send,
    S: RelationalSink + ?Sized,
{
    transform.projection.check_against(dataset, table)?;

    let coercer = ctx.coercer();
    let mut chunks = ChunkedSource::open(source, dataset, ctx.chunk_size, ctx.row_limit).await?;
    let mut report = LoadReport::default();

    while let Some(chunk) = chunks.next_chunk().await? {
        let transformed = transform.apply(&chunk, dataset, &coercer)?;
        let appended = sink.append(table, &transformed.rows).await?;

        let chunk_report = ChunkReport {
            coercion_skipped: transformed.coercion_skipped,
            rows_normalized: transformed.rows_normalized,
            fk_excluded: transformed.fk_excluded,
            rows_appended: appended,
        };
        report.absorb(&chunk_report);
        report.malformed_skipped += chunk.malformed;
        report.lines_read += chunk.lines;
        ctx.progress.inc(chunk.lines);

        if chunk_report.fk_excluded > 0 {
            info!(
                "{}: chunk {} excluded {} rows with unknown keys",
                table.name, report.chunks, chunk_report.fk_excluded
            );
        }
        debug!(
            "{}: chunk {} ({} lines) appended {} rows",
            table.name, report.chunks, chunk.lines, appended
        );
    }

    info!(
        "{}: {} lines read, {} rows appended ({} malformed, {} skipped, {} excluded)",
        table.name,
        report.lines_read,
        report.rows_appended,
        report.malformed_skipped,
        report.coercion_skipped,
        report.fk_excluded
    );

    Ok(report)
}

/// Count data lines in a file, header excluded
///
/// Sizes the progress bar before a load. A last line without a trailing
/// newline still counts.
pub async fn count_lines(path: &Path) -> Result<u64> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::with_capacity(1 << 20, file);
    let mut lines = 0u64;
    let mut last = b'\n';

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        lines += buf.iter().filter(|&&b| b == b'\n').count() as u64;
        if let Some(&b) = buf.last() {
            last = b;
        }
        let len = buf.len();
        reader.consume(len);
    }

    if last != b'\n' {
        lines += 1;
    }
    Ok(lines.saturating_sub(1))
}
