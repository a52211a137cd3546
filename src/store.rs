//! Durable state: the URL history log and the partitioned result store.
//!
//! Two separate artifacts survive between runs:
//!
//! - **History log**: newline-delimited UTF-8, one URL per line, append-only.
//!   A URL is appended immediately after its extraction attempt completes,
//!   so a crash loses at most the in-progress URL. This is the sole resume
//!   checkpoint; a URL present here is never reprocessed.
//! - **Result store**: a workbook with three partitions, `Dados Brutos`
//!   (every record), `Motorista` (driver/passenger/moto URLs) and `99Pay`
//!   (payment URLs). Each partition holds at most one row per URL. Merging
//!   the same batch twice leaves the partitions unchanged; when a URL is
//!   re-extracted the new row wins (re-extraction implies fresher data).
//!
//! The post body is deliberately not exported: the store carries the tabular
//! summary columns only. Columns unknown to this version of the pipeline are
//! preserved at the end of the header, never dropped.

use calamine::{Reader, Xlsx, open_workbook};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_xlsxwriter::Workbook;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::models::PostRecord;

/// Partition holding every merged record.
pub const ALL_PARTITION: &str = "Dados Brutos";
/// Partition derived from driver-related URL paths.
pub const DRIVER_PARTITION: &str = "Motorista";
/// Partition derived from payment-related URL paths.
pub const PAYMENT_PARTITION: &str = "99Pay";

/// Fixed column order of the result store.
pub const CANONICAL_COLUMNS: [&str; 7] = [
    "data_captura",
    "data_publicacao",
    "url",
    "categoria",
    "titulo",
    "resumo_meta",
    "topic_cluster",
];

static PAYMENT_URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/blog/99pay").expect("valid payment partition pattern"));
static DRIVER_URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/blog/(motorista|passageiro|99moto)").expect("valid driver partition pattern")
});

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read result store: {0}")]
    Read(String),
    #[error("failed to persist result store: {0}")]
    Persist(String),
}

/// Append-only set of URLs that completed an extraction attempt.
pub struct History {
    path: PathBuf,
    seen: HashSet<String>,
}

impl History {
    /// Load the history log; a missing file is an empty history, not an error.
    pub async fn load(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let seen = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, seen })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn urls(&self) -> &HashSet<String> {
        &self.seen
    }

    /// Replace the history log wholesale with `urls`, one per line,
    /// deduplicated preserving first-seen order.
    ///
    /// Used to bootstrap the log from a workbook that predates it.
    pub async fn rebuild(path: impl Into<PathBuf>, urls: &[String]) -> std::io::Result<Self> {
        let path = path.into();
        let mut seen = HashSet::new();
        let mut contents = String::new();
        for url in urls {
            let url = url.trim();
            if url.is_empty() || !seen.insert(url.to_string()) {
                continue;
            }
            contents.push_str(url);
            contents.push('\n');
        }
        tokio::fs::write(&path, &contents).await?;
        Ok(Self { path, seen })
    }

    /// Durably append one URL, flushed before returning.
    pub async fn append(&mut self, url: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{url}\n").as_bytes()).await?;
        file.flush().await?;
        self.seen.insert(url.to_string());
        Ok(())
    }
}

/// One named row set of the result store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Partition {
    fn canonical() -> Self {
        Self {
            headers: CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn url_index(&self) -> Option<usize> {
        self.headers.iter().position(|h| h == "url")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Non-empty values of the `url` column, in row order.
    pub fn urls(&self) -> Vec<String> {
        match self.url_index() {
            Some(i) => self
                .rows
                .iter()
                .filter_map(|row| row.get(i))
                .filter(|url| !url.is_empty())
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// The persisted, partitioned result set.
pub struct ResultStore {
    path: PathBuf,
    pub all: Partition,
    pub driver: Partition,
    pub payment: Partition,
}

impl ResultStore {
    /// Load the store from disk, or start from empty partitions when no
    /// workbook exists yet.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!("No existing result store; starting from empty partitions");
            return Ok(Self::empty(path));
        }

        let mut workbook: Xlsx<_> =
            open_workbook(&path).map_err(|e: calamine::XlsxError| StoreError::Read(e.to_string()))?;
        let all = normalize_partition(read_sheet(&mut workbook, ALL_PARTITION));
        let driver = normalize_partition(read_sheet(&mut workbook, DRIVER_PARTITION));
        let payment = normalize_partition(read_sheet(&mut workbook, PAYMENT_PARTITION));
        info!(
            all = all.len(),
            driver = driver.len(),
            payment = payment.len(),
            "Loaded existing result store"
        );
        Ok(Self { path, all, driver, payment })
    }

    /// A store with empty canonical partitions, persisted to `path` on save.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            all: Partition::canonical(),
            driver: Partition::canonical(),
            payment: Partition::canonical(),
        }
    }

    /// Merge a batch of records into the partitions.
    ///
    /// The batch is appended to the "all" partition, which is then
    /// deduplicated by URL (last write wins, first-seen row order kept). The
    /// derived partitions are recomputed in full from the merged set rather
    /// than patched incrementally, so they can never drift out of sync.
    #[instrument(level = "info", skip_all, fields(batch = batch.len()))]
    pub fn merge(&mut self, batch: &[PostRecord]) {
        for record in batch {
            let row = self.row_for(record);
            self.all.rows.push(row);
        }
        dedup_last_write_wins(&mut self.all);
        self.driver = derive_partition(&self.all, &DRIVER_URL_PATTERN);
        self.payment = derive_partition(&self.all, &PAYMENT_URL_PATTERN);
        info!(
            all = self.all.len(),
            driver = self.driver.len(),
            payment = self.payment.len(),
            "Merged batch into partitions"
        );
    }

    /// Persist all partitions together.
    ///
    /// On failure the in-memory merge result is untouched; the caller may
    /// retry the save.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<(), StoreError> {
        let mut workbook = Workbook::new();
        for (name, partition) in [
            (ALL_PARTITION, &self.all),
            (DRIVER_PARTITION, &self.driver),
            (PAYMENT_PARTITION, &self.payment),
        ] {
            let sheet = workbook.add_worksheet();
            sheet
                .set_name(name)
                .map_err(|e| StoreError::Persist(e.to_string()))?;
            for (col, header) in partition.headers.iter().enumerate() {
                sheet
                    .write_string(0, col as u16, header)
                    .map_err(|e| StoreError::Persist(e.to_string()))?;
            }
            for (row_index, row) in partition.rows.iter().enumerate() {
                for (col, cell) in row.iter().enumerate() {
                    sheet
                        .write_string((row_index + 1) as u32, col as u16, cell)
                        .map_err(|e| StoreError::Persist(e.to_string()))?;
                }
            }
        }
        workbook
            .save(&self.path)
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        info!("Result store persisted");
        Ok(())
    }

    /// Map a record onto the "all" partition's header order; columns this
    /// pipeline does not produce stay empty.
    fn row_for(&self, record: &PostRecord) -> Vec<String> {
        self.all
            .headers
            .iter()
            .map(|header| match header.as_str() {
                "data_captura" => record.captured_at.clone(),
                "data_publicacao" => record.published_at.clone(),
                "url" => record.url.clone(),
                "categoria" => record.category.label().to_string(),
                "titulo" => record.title.clone(),
                "resumo_meta" => record.summary.clone(),
                "topic_cluster" => record.topic_cluster_column(),
                _ => String::new(),
            })
            .collect()
    }
}

fn read_sheet<R: std::io::Read + std::io::Seek>(workbook: &mut Xlsx<R>, name: &str) -> Partition {
    match workbook.worksheet_range(name) {
        Ok(range) => {
            let mut rows = range.rows();
            let headers = rows
                .next()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .unwrap_or_default();
            let data = rows
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            Partition { headers, rows: data }
        }
        Err(_) => {
            warn!(sheet = name, "Partition missing from workbook; starting empty");
            Partition::canonical()
        }
    }
}

/// Reorder a loaded partition to the canonical column order, keeping any
/// unknown columns at the end.
fn normalize_partition(partition: Partition) -> Partition {
    let mut headers: Vec<String> = CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    for header in &partition.headers {
        if !headers.contains(header) {
            warn!(column = %header, "Column outside the canonical order; kept at the end");
            headers.push(header.clone());
        }
    }
    let rows = partition
        .rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|header| {
                    partition
                        .headers
                        .iter()
                        .position(|h| h == header)
                        .and_then(|i| row.get(i).cloned())
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect();
    Partition { headers, rows }
}

/// Deduplicate rows by URL: the last row for a URL wins, positioned where
/// the URL was first seen.
fn dedup_last_write_wins(partition: &mut Partition) {
    let Some(url_index) = partition.url_index() else {
        return;
    };
    let mut position_of: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Vec<String>> = Vec::new();
    for row in partition.rows.drain(..) {
        let url = row.get(url_index).cloned().unwrap_or_default();
        match position_of.get(&url) {
            Some(&i) => kept[i] = row,
            None => {
                position_of.insert(url, kept.len());
                kept.push(row);
            }
        }
    }
    partition.rows = kept;
}

/// Subset of the merged set whose URL matches `pattern`.
fn derive_partition(all: &Partition, pattern: &Regex) -> Partition {
    let url_index = all.url_index();
    let rows = all
        .rows
        .iter()
        .filter(|row| {
            url_index
                .and_then(|i| row.get(i))
                .map(|url| pattern.is_match(url))
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    Partition { headers: all.headers.clone(), rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;

    fn record(url: &str, title: &str) -> PostRecord {
        let mut record = PostRecord::placeholder(url);
        record.title = title.to_string();
        record.category = crate::classify::categorize(url);
        record.topic_clusters = vec!["Geral".to_string()];
        record
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut store = ResultStore::empty("unused.xlsx");
        let batch = vec![
            record("https://x/blog/motorista/a/", "A"),
            record("https://x/blog/99pay/b/", "B"),
        ];
        store.merge(&batch);
        let (all, driver, payment) = (store.all.len(), store.driver.len(), store.payment.len());
        store.merge(&batch);
        assert_eq!(store.all.len(), all);
        assert_eq!(store.driver.len(), driver);
        assert_eq!(store.payment.len(), payment);
    }

    #[test]
    fn test_merge_last_write_wins_for_same_url() {
        let mut store = ResultStore::empty("unused.xlsx");
        store.merge(&[record("https://x/blog/motorista/a/", "Old Title")]);
        store.merge(&[record("https://x/blog/motorista/a/", "New Title")]);

        assert_eq!(store.all.len(), 1);
        let title_index = store
            .all
            .headers
            .iter()
            .position(|h| h == "titulo")
            .unwrap();
        assert_eq!(store.all.rows[0][title_index], "New Title");
    }

    #[test]
    fn test_merge_preserves_first_seen_row_order() {
        let mut store = ResultStore::empty("unused.xlsx");
        store.merge(&[
            record("https://x/blog/outros/a/", "A"),
            record("https://x/blog/outros/b/", "B"),
        ]);
        store.merge(&[record("https://x/blog/outros/a/", "A2")]);

        let url_index = store.all.url_index().unwrap();
        assert_eq!(store.all.rows[0][url_index], "https://x/blog/outros/a/");
        assert_eq!(store.all.rows[1][url_index], "https://x/blog/outros/b/");
    }

    #[test]
    fn test_derived_partitions_by_url_pattern() {
        let mut store = ResultStore::empty("unused.xlsx");
        store.merge(&[
            record("https://x/blog/motorista/a/", "A"),
            record("https://x/blog/passageiro/b/", "B"),
            record("https://x/blog/99moto/c/", "C"),
            record("https://x/blog/99pay/d/", "D"),
            record("https://x/blog/outros/e/", "E"),
        ]);
        assert_eq!(store.all.len(), 5);
        assert_eq!(store.driver.len(), 3);
        assert_eq!(store.payment.len(), 1);
    }

    #[test]
    fn test_derived_partition_pattern_is_case_insensitive() {
        let mut store = ResultStore::empty("unused.xlsx");
        store.merge(&[record("https://x/blog/99Moto/c/", "C")]);
        assert_eq!(store.driver.len(), 1);
    }

    #[test]
    fn test_row_follows_canonical_column_order() {
        let mut store = ResultStore::empty("unused.xlsx");
        let mut one = record("https://x/blog/99pay/a/", "Title A");
        one.summary = "Summary A".to_string();
        one.topic_clusters = vec!["Renda Extra".to_string(), "Quero Investir".to_string()];
        store.merge(&[one]);

        let row = &store.all.rows[0];
        assert_eq!(store.all.headers, CANONICAL_COLUMNS.to_vec());
        assert_eq!(row[2], "https://x/blog/99pay/a/");
        assert_eq!(row[3], Category::Payment.label());
        assert_eq!(row[4], "Title A");
        assert_eq!(row[5], "Summary A");
        assert_eq!(row[6], "Renda Extra, Quero Investir");
    }

    #[test]
    fn test_normalize_partition_keeps_unknown_columns_at_end() {
        let loaded = Partition {
            headers: vec!["url".to_string(), "notas".to_string(), "titulo".to_string()],
            rows: vec![vec![
                "https://x/blog/a/".to_string(),
                "observação antiga".to_string(),
                "Old".to_string(),
            ]],
        };
        let normalized = normalize_partition(loaded);
        assert_eq!(normalized.headers.len(), CANONICAL_COLUMNS.len() + 1);
        assert_eq!(normalized.headers.last().unwrap(), "notas");

        let url_index = normalized.url_index().unwrap();
        assert_eq!(normalized.rows[0][url_index], "https://x/blog/a/");
        assert_eq!(normalized.rows[0].last().unwrap(), "observação antiga");
        // Canonical columns the loaded row did not carry come back empty.
        assert_eq!(normalized.rows[0][0], "");
    }

    #[test]
    fn test_merge_fills_unknown_columns_with_empty_cells() {
        let mut store = ResultStore::empty("unused.xlsx");
        store.all = normalize_partition(Partition {
            headers: vec!["url".to_string(), "notas".to_string()],
            rows: vec![],
        });
        store.merge(&[record("https://x/blog/outros/a/", "A")]);
        let row = &store.all.rows[0];
        assert_eq!(row.len(), store.all.headers.len());
        assert_eq!(row.last().unwrap(), "");
    }

    #[tokio::test]
    async fn test_history_absent_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::load(dir.path().join("historico.txt")).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_history_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historico.txt");

        let mut history = History::load(&path).await.unwrap();
        history.append("https://x/blog/a/").await.unwrap();
        history.append("https://x/blog/b/").await.unwrap();
        assert!(history.contains("https://x/blog/a/"));
        assert_eq!(history.len(), 2);

        let reloaded = History::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("https://x/blog/b/"));
    }

    #[tokio::test]
    async fn test_history_rebuild_overwrites_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historico.txt");
        tokio::fs::write(&path, "https://x/blog/old/\n").await.unwrap();

        let urls = vec![
            "https://x/blog/a/".to_string(),
            "https://x/blog/b/".to_string(),
            "https://x/blog/a/".to_string(),
            "  ".to_string(),
        ];
        let history = History::rebuild(&path, &urls).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history.contains("https://x/blog/old/"));

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "https://x/blog/a/\nhttps://x/blog/b/\n");
    }

    #[test]
    fn test_partition_urls_skips_empty_cells() {
        let mut store = ResultStore::empty("unused.xlsx");
        store.merge(&[
            record("https://x/blog/outros/a/", "A"),
            record("https://x/blog/outros/b/", "B"),
        ]);
        store.all.rows.push(vec![String::new(); CANONICAL_COLUMNS.len()]);
        assert_eq!(
            store.all.urls(),
            vec![
                "https://x/blog/outros/a/".to_string(),
                "https://x/blog/outros/b/".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_history_ignores_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historico.txt");
        tokio::fs::write(&path, "https://x/blog/a/\n\n  \nhttps://x/blog/b/\n")
            .await
            .unwrap();
        let history = History::load(&path).await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
