//! # Blog Harvest
//!
//! An incremental harvesting and classification pipeline for the 99 blog.
//! Each run discovers post URLs from the sitemap, extracts the ones no
//! previous run has processed through a rendered-browser strategy chain,
//! classifies every record into a category and topic clusters, and merges
//! the batch into a partitioned spreadsheet store.
//!
//! ## Features
//!
//! - Sitemap discovery with blog-post filtering and order-preserving dedup
//! - Incremental runs: a durable history log makes every URL process-once
//! - Two-strategy extraction (rendered session, then direct HTTP fallback)
//!   that always yields a complete record, placeholder sentinels included
//! - Rendering-session lifecycle management: periodic recycling plus
//!   one-shot recovery from a dead session
//! - Rule-based categorization and Portuguese topic-cluster tagging
//! - Idempotent merge into `Dados Brutos` / `Motorista` / `99Pay` partitions
//! - Operator recovery subcommands: re-extract a hand-supplied URL list,
//!   rebuild the history log from an existing workbook
//!
//! ## Usage
//!
//! ```sh
//! blog_harvest --output blog99_resultado.xlsx
//! blog_harvest reextract urls_com_erro.txt
//! blog_harvest rebuild-history blog99_resultado.xlsx
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Discovery**: Fetch the sitemap and compute the candidate URL set
//! 2. **Extraction**: Route each candidate through the strategy chain,
//!    sequentially, on one managed rendering session
//! 3. **Classification**: Assign category and topic clusters per record
//! 4. **Persistence**: Merge the batch into the partitioned store and
//!    append each URL to the history log as it completes

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod classify;
mod cli;
mod extract;
mod frontier;
mod models;
mod session;
mod store;
mod utils;

use cli::{Cli, Command};
use extract::{HttpArticleFetch, extract_post};
use models::{PostRecord, RunSummary};
use session::{SessionConfig, SessionManager};
use store::{History, ResultStore};
use utils::{prune_run_logs, run_log_name};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init: stdout plus a per-run log file ---
    std::fs::create_dir_all(&args.log_dir)?;
    let log_path = Path::new(&args.log_dir).join(run_log_name());
    let log_file = std::fs::File::create(&log_path)?;
    let (file_writer, _file_guard) = tracing_appender::non_blocking(log_file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tfmt::layer()
                .with_target(true)
                .with_timer(tfmt::time::UtcTime::rfc_3339()),
        )
        .with(
            tfmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_timer(tfmt::time::UtcTime::rfc_3339()),
        )
        .init();

    let start_time = std::time::Instant::now();
    info!(log = %log_path.display(), "blog_harvest starting up");
    debug!(?args, "Parsed CLI arguments");

    let outcome = match &args.command {
        Some(Command::Reextract { urls_file, output }) => {
            run_reextract(&args, urls_file, output).await
        }
        Some(Command::RebuildHistory { workbook }) => run_rebuild_history(&args, workbook).await,
        None => run_harvest(&args).await,
    };

    let elapsed = start_time.elapsed();
    info!(secs = elapsed.as_secs(), "Run complete");
    prune_run_logs(&args.log_dir);
    outcome
}

/// The full pipeline: discovery, incremental extraction, classification,
/// history checkpointing, store merge.
async fn run_harvest(args: &Cli) -> Result<(), Box<dyn Error>> {
    let discovered = frontier::discover(&args.sitemap_url).await;
    let mut history = History::load(&args.history).await?;
    let candidates = frontier::candidates(&discovered, history.urls());
    info!(
        discovered = discovered.len(),
        already_processed = history.len(),
        new = candidates.len(),
        "Computed candidate set"
    );

    if candidates.is_empty() {
        info!("No new URLs to process; run complete");
        return Ok(());
    }

    let mut manager = SessionManager::with_chrome(session_config(args));
    let fallback = HttpArticleFetch::new()?;
    let (records, summary) =
        extract_batch(&mut manager, &fallback, &candidates, Some(&mut history)).await;
    manager.shutdown();

    persist_batch(&args.output, &records, false);
    log_summary(&summary);
    Ok(())
}

/// Re-run extraction over a hand-supplied URL list, exporting the batch to
/// a separate workbook. The history log is left untouched.
async fn run_reextract(args: &Cli, urls_file: &str, output: &str) -> Result<(), Box<dyn Error>> {
    let contents = tokio::fs::read_to_string(urls_file).await?;
    let urls: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    info!(count = urls.len(), file = urls_file, "URLs to re-extract");

    if urls.is_empty() {
        warn!("URL list is empty; nothing to re-extract");
        return Ok(());
    }

    let mut manager = SessionManager::with_chrome(session_config(args));
    let fallback = HttpArticleFetch::new()?;
    let (records, summary) = extract_batch(&mut manager, &fallback, &urls, None).await;
    manager.shutdown();

    persist_batch(output, &records, true);
    log_summary(&summary);
    Ok(())
}

/// Rebuild the history log from the `url` column of an existing workbook,
/// replacing whatever the log held before.
async fn run_rebuild_history(args: &Cli, workbook: &str) -> Result<(), Box<dyn Error>> {
    if !Path::new(workbook).exists() {
        error!(path = workbook, "Workbook not found; history log left untouched");
        return Err(format!("workbook not found: {workbook}").into());
    }

    let result_store = ResultStore::load(workbook)?;
    let urls = result_store.all.urls();
    if urls.is_empty() {
        warn!(path = workbook, "Workbook holds no URLs");
    }
    let history = History::rebuild(&args.history, &urls).await?;
    info!(
        count = history.len(),
        path = %args.history,
        "History log rebuilt from workbook"
    );
    Ok(())
}

fn session_config(args: &Cli) -> SessionConfig {
    SessionConfig {
        recycle_after: args.recycle_after,
        page_timeout: Duration::from_secs(args.page_timeout_secs),
        ..SessionConfig::default()
    }
}

/// Route each URL through the strategy chain, classify the record, and
/// (when given a history log) checkpoint the URL immediately.
///
/// Stops early when the rendering session cannot be (re)created; records
/// completed so far are returned for persistence.
async fn extract_batch(
    manager: &mut SessionManager,
    fallback: &HttpArticleFetch,
    urls: &[String],
    mut history: Option<&mut History>,
) -> (Vec<PostRecord>, RunSummary) {
    let total = urls.len();
    let mut summary = RunSummary::default();
    let mut records = Vec::with_capacity(total);
    for (i, url) in urls.iter().enumerate() {
        if let Err(e) = manager.maybe_recycle().await {
            error!(error = %e, "Failed to recycle the rendering session; stopping early");
            break;
        }

        let mut attempt = match extract_post(manager, fallback, url).await {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(error = %e, "Rendering session could not be created; stopping early");
                break;
            }
        };

        let record = attempt.record_mut();
        let (category, clusters) = classify::classify(&record.url, &record.title, &record.summary);
        record.category = category;
        record.topic_clusters = clusters;

        // Checkpoint immediately so a crash never reprocesses this URL.
        if let Some(history) = history.as_deref_mut() {
            if let Err(e) = history.append(url).await {
                warn!(%url, error = %e, "Failed to append URL to history log");
            }
        }
        manager.note_processed();
        summary.note(&attempt);
        info!(
            index = i + 1,
            total,
            success = attempt.is_success(),
            category = %attempt.record().category,
            "Processed URL"
        );
        records.push(attempt.into_record());
    }
    (records, summary)
}

/// Merge the batch into the store at `path` and save it. With `fresh` the
/// store starts from empty partitions, overwriting any existing workbook.
fn persist_batch(path: &str, records: &[PostRecord], fresh: bool) {
    let loaded = if fresh {
        Ok(ResultStore::empty(path))
    } else {
        ResultStore::load(path)
    };
    match loaded {
        Ok(mut result_store) => {
            result_store.merge(records);
            if let Err(e) = result_store.save() {
                error!(path, error = %e, "Failed to persist result store");
            }
        }
        Err(e) => {
            // Never overwrite a store we could not read.
            error!(path, error = %e, "Failed to load result store; batch not persisted");
        }
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        attempted = summary.attempted,
        extracted = summary.extracted,
        placeholders = summary.placeholders,
        "Extraction summary"
    );
}
