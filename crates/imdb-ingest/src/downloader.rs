// Dump downloader: fetch `<base_url>/<file>.tsv.gz` when absent, then gunzip

use flate2::read::GzDecoder;
use reqwest::Client;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::progress::{create_download_progress, format_bytes};
use crate::source::Dataset;

/// Official location of the IMDb dumps
pub const DEFAULT_BASE_URL: &str = "https://datasets.imdbws.com";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Makes sure the decompressed dump files exist in a local directory
pub struct DumpDownloader {
    client: Client,
    base_url: String,
    data_dir: PathBuf,
    max_retries: u32,
    retry_delay: Duration,
    show_progress: bool,
}

impl DumpDownloader {
    pub fn new(base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("imdb-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            data_dir: data_dir.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(2),
            show_progress: false,
        })
    }

    /// Attempts per file and the first backoff delay (doubled per retry)
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn url_for(&self, dataset: Dataset) -> String {
        format!("{}/{}", self.base_url, dataset.archive_name())
    }

    /// Path of the decompressed file, downloading and decompressing if needed
    ///
    /// An existing `.tsv` is used as is. An existing `.tsv.gz` is decompressed
    /// without downloading. The archive is removed after decompression.
    pub async fn ensure(&self, dataset: Dataset) -> Result<PathBuf> {
        let raw = dataset.path_in(&self.data_dir);
        let archive = self.data_dir.join(dataset.archive_name());

        if tokio::fs::try_exists(&raw).await? {
            info!("{} already present, skipping download", raw.display());
            return Ok(raw);
        }

        tokio::fs::create_dir_all(&self.data_dir).await?;

        if !tokio::fs::try_exists(&archive).await? {
            let url = self.url_for(dataset);
            self.download_with_retry(&url, &archive).await?;
        } else {
            info!("{} already present, skipping download", archive.display());
        }

        let bytes = gunzip_file(&archive, &raw).await?;
        tokio::fs::remove_file(&archive).await?;
        info!("Decompressed {} ({})", raw.display(), format_bytes(bytes));

        Ok(raw)
    }

    /// [`ensure`](Self::ensure) each dataset in turn
    pub async fn ensure_all(&self, datasets: &[Dataset]) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(datasets.len());
        for &dataset in datasets {
            paths.push(self.ensure(dataset).await?);
        }
        Ok(paths)
    }

    /// Download with exponential backoff between attempts
    async fn download_with_retry(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.download(url, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("Download attempt {}/{} failed: {}", attempt, self.max_retries, e);
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        let delay = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                        info!("Retrying in {:?}...", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| IngestError::Config(format!("no download attempts for {}", url))))
    }

    /// Stream `url` to `dest` through a `.part` file
    ///
    /// The `.part` file is removed when the transfer fails.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let part = dest.with_extension("gz.part");

        match self.transfer(url, &part).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove {}: {}", part.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn transfer(&self, url: &str, part: &Path) -> Result<u64> {
        info!("Downloading {}", url);

        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length().unwrap_or(0);
        let name = part
            .file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(".part").to_string())
            .unwrap_or_else(|| url.to_string());
        let pb = create_download_progress(total, &name, self.show_progress);

        let mut file = tokio::fs::File::create(part).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            pb.inc(chunk.len() as u64);
        }
        file.flush().await?;
        drop(file);
        pb.finish_and_clear();

        info!("Downloaded {} ({})", name, format_bytes(written));
        Ok(written)
    }
}

/// Decompress a single gzip stream from `src` into `dest`
///
/// Runs on a blocking thread. Output goes to a temporary sibling that is
/// renamed into place once complete, so an interrupted run never leaves a
/// truncated `dest` behind.
pub async fn gunzip_file(src: &Path, dest: &Path) -> Result<u64> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    let tmp = dest.with_extension("tsv.part");

    let tmp_for_task = tmp.clone();
    let bytes = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let input = std::fs::File::open(&src)?;
        let mut decoder = GzDecoder::new(BufReader::new(input));
        let mut output = BufWriter::new(std::fs::File::create(&tmp_for_task)?);
        let bytes = std::io::copy(&mut decoder, &mut output)?;
        output.flush()?;
        Ok(bytes)
    })
    .await
    .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;

    tokio::fs::rename(&tmp, &dest).await?;
    Ok(bytes)
}
