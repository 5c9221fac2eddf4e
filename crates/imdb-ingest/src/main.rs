//! IMDb Ingest - load the IMDb TSV dumps into Postgres

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imdb_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use imdb_ingest::{
    Dataset, DumpDownloader, ErrorPolicy, IngestConfig, IntegerPolicy, JobStatus, MemorySink,
    PgSink, Pipeline, RunReport, SchemaRegistry,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "imdb-ingest")]
#[command(author, version, about = "Load the IMDb TSV dumps into a relational database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the dump files (overrides IMDB_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and decompress the dump files that are not present yet
    Download {
        /// Only these files (e.g. title.basics); repeatable
        #[arg(long)]
        only: Vec<Dataset>,
    },

    /// Create or drop the destination tables
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Reset the tables and load every dump file
    Load {
        /// Download missing files first
        #[arg(long)]
        download: bool,

        /// Load into memory instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Stop at the first failed table
        #[arg(long)]
        fail_fast: bool,

        /// Source lines per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Read at most this many lines per file
        #[arg(long)]
        limit: Option<u64>,

        /// What to do with unparseable numbers: strict, skip-row or null
        #[arg(long)]
        integer_policy: Option<IntegerPolicy>,

        /// Only load these tables; repeatable
        #[arg(long)]
        only: Vec<String>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum SchemaAction {
    Create,
    Drop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Both)
        .log_file_prefix("imdb-ingest")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=warn")
        .build();

    // Environment variables take precedence over the defaults above
    let log_config = match log_config.merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Execute the command; `Ok(false)` means it ran but some table failed
async fn run(cli: Cli) -> Result<bool> {
    let mut config = IngestConfig::load().context("loading configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.no_progress {
        config.show_progress = false;
    }

    match cli.command {
        Command::Download { only } => {
            let datasets = if only.is_empty() {
                Dataset::ALL.to_vec()
            } else {
                only
            };
            let downloader = DumpDownloader::new(&config.base_url, &config.data_dir)?
                .with_progress(config.show_progress);
            let paths = downloader.ensure_all(&datasets).await?;
            info!("{} dump files ready in {}", paths.len(), config.data_dir.display());
            Ok(true)
        }

        Command::Schema { action } => {
            let registry = SchemaRegistry::imdb()?;
            let mut sink = PgSink::connect(&config.database_url)
                .await
                .context("connecting to the database")?;
            match action {
                SchemaAction::Create => {
                    registry.create_all(&mut sink, config.toggle_fk_checks).await?
                }
                SchemaAction::Drop => registry.drop_all(&mut sink, config.toggle_fk_checks).await?,
            }
            sink.close().await?;
            info!("Schema {:?} complete", action);
            Ok(true)
        }

        Command::Load {
            download,
            dry_run,
            fail_fast,
            chunk_size,
            limit,
            integer_policy,
            only,
            json,
        } => {
            config.download |= download;
            if fail_fast {
                config.error_policy = ErrorPolicy::FailFast;
            }
            if let Some(size) = chunk_size {
                config.chunk_size = size;
            }
            if limit.is_some() {
                config.row_limit = limit;
            }
            if let Some(policy) = integer_policy {
                config.integer_policy = policy;
            }
            config.validate()?;

            let pipeline = Pipeline::imdb(config.pipeline_options())?.only(&only)?;

            if config.download {
                DumpDownloader::new(&config.base_url, &config.data_dir)?
                    .with_progress(config.show_progress)
                    .ensure_all(&pipeline.datasets())
                    .await?;
            }

            let report = if dry_run {
                info!("Dry run: loading into memory");
                let mut sink = MemorySink::new();
                pipeline.run(&mut sink).await?
            } else {
                let mut sink = PgSink::connect(&config.database_url)
                    .await
                    .context("connecting to the database")?;
                let report = pipeline.run(&mut sink).await?;
                sink.close().await?;
                report
            };

            print_summary(&report, json)?;
            Ok(report.succeeded())
        }
    }
}

fn print_summary(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!(
        "{:<26} {:<10} {:>12} {:>12} {:>10} {:>10} {:>10}",
        "table", "status", "lines", "rows", "malformed", "excluded", "secs"
    );
    for outcome in &report.outcomes {
        let status = match outcome.status {
            JobStatus::Succeeded => "ok",
            JobStatus::Failed => "FAILED",
            JobStatus::Skipped => "skipped",
        };
        let (lines, rows, malformed, excluded) = outcome
            .report
            .as_ref()
            .map(|r| (r.lines_read, r.rows_appended, r.malformed_skipped, r.fk_excluded))
            .unwrap_or_default();
        println!(
            "{:<26} {:<10} {:>12} {:>12} {:>10} {:>10} {:>10.1}",
            outcome.table,
            status,
            lines,
            rows,
            malformed,
            excluded,
            outcome.elapsed_ms as f64 / 1000.0
        );
        if let Some(error) = &outcome.error {
            println!("    {}", error);
        }
    }

    println!();
    println!("Row counts:");
    for (table, count) in &report.row_counts {
        println!("  {:<26} {:>12}", table, count);
    }
    Ok(())
}
