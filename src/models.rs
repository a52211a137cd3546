//! Data models for harvested blog posts.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`PostRecord`]: One harvested page with extracted and classified fields
//! - [`Attempt`]: The explicit per-URL outcome of the extraction state machine
//! - [`PlaceholderReason`]: Why an extraction degraded to placeholder values
//! - [`RunSummary`]: Counters reported at the end of a run
//!
//! Every field of a [`PostRecord`] that leaves the pipeline is populated with
//! either a real value or one of the placeholder sentinels below. Downstream
//! consumers never see a partially-filled record.

use serde::{Deserialize, Serialize};

use crate::classify::Category;

/// Sentinel for a title that could not be extracted.
pub const TITLE_UNAVAILABLE: &str = "Title Unavailable";
/// Sentinel for a missing `description` meta tag.
pub const SUMMARY_UNAVAILABLE: &str = "Meta Summary Unavailable";
/// Sentinel for a body that could not be extracted by any strategy.
pub const CONTENT_UNAVAILABLE: &str = "Content Unavailable";
/// Sentinel for a publish date no strategy could find.
pub const DATE_UNAVAILABLE: &str = "Date Unavailable";

/// One harvested blog post.
///
/// Created fresh per URL per extraction attempt and never reused across URLs.
/// The record is destroyed once it has been appended to the partitioned store
/// and the URL has entered the history log.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostRecord {
    /// Unique key; stable identity of the post across runs.
    pub url: String,
    /// Extracted post title, or [`TITLE_UNAVAILABLE`].
    pub title: String,
    /// Meta-description summary, or [`SUMMARY_UNAVAILABLE`].
    pub summary: String,
    /// Visible article text, or [`CONTENT_UNAVAILABLE`].
    pub body: String,
    /// Publish timestamp (`%Y-%m-%d %H:%M:%S` when parsed), or [`DATE_UNAVAILABLE`].
    pub published_at: String,
    /// Local timestamp of the extraction attempt, not of publication.
    pub captured_at: String,
    /// Coarse category assigned by the classifier.
    pub category: Category,
    /// Fine-grained topic labels; non-empty once classified.
    pub topic_clusters: Vec<String>,
}

impl PostRecord {
    /// A record carrying only placeholder values for `url`, captured now.
    ///
    /// The extraction state machine starts from this and replaces fields as
    /// strategies succeed, so a failed attempt still yields a complete record.
    pub fn placeholder(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: TITLE_UNAVAILABLE.to_string(),
            summary: SUMMARY_UNAVAILABLE.to_string(),
            body: CONTENT_UNAVAILABLE.to_string(),
            published_at: DATE_UNAVAILABLE.to_string(),
            captured_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            category: Category::Other,
            topic_clusters: Vec::new(),
        }
    }

    /// True when the body holds real extracted content rather than the sentinel.
    pub fn has_real_body(&self) -> bool {
        self.body != CONTENT_UNAVAILABLE && !self.body.trim().is_empty()
    }

    /// Topic clusters joined for tabular output.
    pub fn topic_cluster_column(&self) -> String {
        self.topic_clusters.join(", ")
    }
}

/// Why an extraction attempt degraded to placeholder values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderReason {
    /// Page readiness wait exceeded the bounded timeout.
    Timeout,
    /// The rendering session died and the one-recovery budget was spent.
    SessionFatal,
    /// Primary content was too thin and the fallback yielded nothing.
    ThinContent,
    /// Any other error caught at the per-URL boundary.
    Unexpected,
}

impl PlaceholderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceholderReason::Timeout => "timeout",
            PlaceholderReason::SessionFatal => "session_fatal",
            PlaceholderReason::ThinContent => "thin_content",
            PlaceholderReason::Unexpected => "unexpected",
        }
    }
}

/// Outcome of routing one URL through the extraction strategy chain.
///
/// The state machine composes this value instead of propagating failures:
/// both variants carry a complete [`PostRecord`], so downstream stages never
/// need to handle a missing record.
#[derive(Debug)]
pub enum Attempt {
    /// A real body was extracted (primary pass or fallback).
    Success(PostRecord),
    /// Extraction failed or was incomplete; fields hold sentinels where needed.
    Placeholder(PostRecord, PlaceholderReason),
}

impl Attempt {
    pub fn record(&self) -> &PostRecord {
        match self {
            Attempt::Success(r) | Attempt::Placeholder(r, _) => r,
        }
    }

    pub fn record_mut(&mut self) -> &mut PostRecord {
        match self {
            Attempt::Success(r) | Attempt::Placeholder(r, _) => r,
        }
    }

    pub fn into_record(self) -> PostRecord {
        match self {
            Attempt::Success(r) | Attempt::Placeholder(r, _) => r,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Attempt::Success(_))
    }
}

/// Counters for the end-of-run summary.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// URLs routed through the pipeline this run.
    pub attempted: usize,
    /// Records with a real extracted body.
    pub extracted: usize,
    /// Records that degraded to placeholder values.
    pub placeholders: usize,
}

impl RunSummary {
    pub fn note(&mut self, attempt: &Attempt) {
        self.attempted += 1;
        if attempt.is_success() {
            self.extracted += 1;
        } else {
            self.placeholders += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_record_is_fully_populated() {
        let record = PostRecord::placeholder("https://99app.com/blog/motorista/teste/");
        assert_eq!(record.url, "https://99app.com/blog/motorista/teste/");
        assert_eq!(record.title, TITLE_UNAVAILABLE);
        assert_eq!(record.summary, SUMMARY_UNAVAILABLE);
        assert_eq!(record.body, CONTENT_UNAVAILABLE);
        assert_eq!(record.published_at, DATE_UNAVAILABLE);
        assert!(!record.captured_at.is_empty());
        assert!(!record.has_real_body());
    }

    #[test]
    fn test_sentinels_are_distinct_from_empty() {
        for sentinel in [
            TITLE_UNAVAILABLE,
            SUMMARY_UNAVAILABLE,
            CONTENT_UNAVAILABLE,
            DATE_UNAVAILABLE,
        ] {
            assert!(!sentinel.is_empty());
        }
    }

    #[test]
    fn test_has_real_body() {
        let mut record = PostRecord::placeholder("https://x/blog/a/");
        assert!(!record.has_real_body());
        record.body = "some actual text".to_string();
        assert!(record.has_real_body());
        record.body = "   ".to_string();
        assert!(!record.has_real_body());
    }

    #[test]
    fn test_topic_cluster_column_joins_with_comma() {
        let mut record = PostRecord::placeholder("https://x/blog/a/");
        record.topic_clusters = vec!["Seguro".to_string(), "Multas".to_string()];
        assert_eq!(record.topic_cluster_column(), "Seguro, Multas");
    }

    #[test]
    fn test_attempt_accessors() {
        let record = PostRecord::placeholder("https://x/blog/a/");
        let attempt = Attempt::Placeholder(record, PlaceholderReason::Timeout);
        assert!(!attempt.is_success());
        assert_eq!(attempt.record().url, "https://x/blog/a/");
        match &attempt {
            Attempt::Placeholder(_, reason) => assert_eq!(reason.as_str(), "timeout"),
            Attempt::Success(_) => panic!("expected placeholder"),
        }
    }

    #[test]
    fn test_run_summary_counts() {
        let mut summary = RunSummary::default();
        let mut ok = PostRecord::placeholder("https://x/blog/a/");
        ok.body = "real content".to_string();
        summary.note(&Attempt::Success(ok));
        summary.note(&Attempt::Placeholder(
            PostRecord::placeholder("https://x/blog/b/"),
            PlaceholderReason::ThinContent,
        ));
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.placeholders, 1);
    }

    #[test]
    fn test_post_record_serialization_roundtrip() {
        let record = PostRecord::placeholder("https://99app.com/blog/99pay/conta/");
        let json = serde_json::to_string(&record).unwrap();
        let back: PostRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, record.url);
        assert_eq!(back.title, TITLE_UNAVAILABLE);
    }
}
