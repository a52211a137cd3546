//! Utility functions for run-log naming, retention, and string manipulation.
//!
//! This module provides helper functions used throughout the application:
//! - Run log file naming and retention (keep the newest N logs)
//! - String truncation for logging

use chrono::Local;
use std::fs as stdfs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Prefix of run log file names.
pub const LOG_PREFIX: &str = "harvest_log_";
/// Suffix of run log file names.
pub const LOG_SUFFIX: &str = ".log";
/// Number of run logs kept after cleanup, current run included.
pub const LOGS_TO_KEEP: usize = 3;

/// Build the log file name for a run starting now, e.g.
/// `harvest_log_2026-08-28_14-30-05.log`.
pub fn run_log_name() -> String {
    format!(
        "{LOG_PREFIX}{}{LOG_SUFFIX}",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Delete old run logs, keeping only the newest [`LOGS_TO_KEEP`].
///
/// Recency is decided by modification time. Files that don't match the
/// run-log naming pattern are never touched, and any I/O failure on a
/// single file is logged and skipped so cleanup can't abort a run.
#[instrument(level = "info", skip_all, fields(dir = %dir.as_ref().display()))]
pub fn prune_run_logs(dir: impl AsRef<Path>) {
    let entries = match stdfs::read_dir(dir.as_ref()) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to list log directory; skipping log cleanup");
            return;
        }
    };

    let mut logs: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    if logs.len() <= LOGS_TO_KEEP {
        return;
    }

    // Newest first; everything past the keep window goes.
    logs.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in logs.split_off(LOGS_TO_KEEP) {
        match stdfs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Removed old run log"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old run log"),
        }
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes with an ellipsis and byte
/// count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", &s[..max], s.len() - max)
    }
}
