//! Command-line interface definitions for the blog harvesting pipeline.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! All arguments can be provided via command-line flags or environment variables.

use clap::{Parser, Subcommand};

/// Command-line arguments for the harvesting pipeline.
///
/// Every option carries a default tuned to the 99 blog, so a bare
/// invocation runs the full pipeline. Paths are created on demand.
///
/// # Examples
///
/// ```sh
/// # Run against the default sitemap with default output paths
/// blog_harvest
///
/// # Point at a different sitemap and result workbook
/// blog_harvest --sitemap-url https://example.com/sitemap.xml --output resultado.xlsx
///
/// # Recycle the rendering session more aggressively
/// blog_harvest --recycle-after 50 --page-timeout-secs 10
///
/// # Re-extract a hand-supplied URL list into a separate workbook
/// blog_harvest reextract urls_com_erro.txt
///
/// # Rebuild the history log from an already-processed workbook
/// blog_harvest rebuild-history blog99_resultado.xlsx
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Operator recovery tooling; omit to run the full harvest pipeline
    #[command(subcommand)]
    pub command: Option<Command>,
    /// Sitemap URL used for blog post discovery
    #[arg(
        short,
        long,
        env = "BLOG_SITEMAP_URL",
        default_value = "https://99app.com/sitemap/main.xml"
    )]
    pub sitemap_url: String,

    /// Path of the result workbook (created when absent)
    #[arg(short, long, env = "BLOG_OUTPUT", default_value = "blog99_resultado.xlsx")]
    pub output: String,

    /// Path of the processed-URL history log (created when absent)
    #[arg(
        long,
        env = "BLOG_HISTORY",
        default_value = "historico_urls_processadas.txt"
    )]
    pub history: String,

    /// Directory for run log files
    #[arg(long, env = "BLOG_LOG_DIR", default_value = ".")]
    pub log_dir: String,

    /// Number of URLs processed before the rendering session is recycled
    #[arg(long, env = "BLOG_RECYCLE_AFTER", default_value_t = 150)]
    pub recycle_after: usize,

    /// Per-page readiness timeout, in seconds
    #[arg(long, env = "BLOG_PAGE_TIMEOUT_SECS", default_value_t = 15)]
    pub page_timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Re-run extraction over a file of URLs, exporting to a separate workbook
    ///
    /// The history log is not consulted or updated: the listed URLs were
    /// already processed and are being redone by hand.
    Reextract {
        /// Text file with one URL per line
        urls_file: String,

        /// Workbook the re-extracted batch is written to
        #[arg(short, long, default_value = "reextracao_resultado.xlsx")]
        output: String,
    },

    /// Rebuild the history log from the url column of an existing workbook
    RebuildHistory {
        /// Workbook holding already-processed URLs
        workbook: String,
    },
}
