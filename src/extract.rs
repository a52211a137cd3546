//! Per-URL extraction strategy chain.
//!
//! Each candidate URL runs through a small state machine with a budget of at
//! most two attempts:
//!
//! ```text
//! Start → PageLoaded → FieldsParsed → ContentChecked → Accepted
//!                                                    ↘ FallbackTried
//! ```
//!
//! The primary strategy drives the rendering session: navigate, wait for the
//! `body` element, parse title/summary/publish date from the rendered HTML,
//! then read the article text through an ordered list of content selectors
//! (most specific first, whole page body last). A body under 30 words is
//! considered invalid and triggers the secondary strategy: a direct
//! full-article fetch independent of the session, whose non-empty result
//! overwrites everything from the primary pass.
//!
//! Failure handling:
//! - readiness timeout aborts the attempt immediately (no retry);
//! - a session-fatal error triggers one session recovery and a restart from
//!   `Start`; a second fatal within the same URL gives up;
//! - any other error degrades to a placeholder record.
//!
//! Whatever happens, the chain returns a complete [`Attempt`]: it never
//! raises past its own boundary except when a replacement session cannot be
//! created at all, which ends the run segment.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::models::{Attempt, PlaceholderReason, PostRecord};
use crate::session::{RenderSession, SessionError, SessionManager};
use crate::utils::truncate_for_log;

/// Minimum whitespace-delimited word count for a body to be accepted.
pub const MIN_BODY_WORDS: usize = 30;

/// Content containers, most specific first; `body` is the last resort.
const CONTENT_SELECTORS: &[&str] = &[
    "article.entry-content",
    "div.entry-content",
    "div.post-content",
    "div.td-post-content",
    "main",
    "body",
];

/// Literal date patterns scanned over visible text blocks, in match order:
/// Portuguese long-form month dates, then `YYYY-MM-DD`, then `DD/MM/YYYY`.
static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(
            r"(?i)\b\d{1,2}\s+(?:de\s+)?(?:janeiro|fevereiro|março|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)\s+(?:de\s+)?\d{4}\b",
        )
        .expect("valid long-form date pattern"),
        Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid ISO date pattern"),
        Regex::new(r"\b\d{2}/\d{2}/\d{4}\b").expect("valid DD/MM/YYYY pattern"),
    ]
});

/// Metadata fields parsed from the rendered page.
#[derive(Debug, Default, PartialEq)]
pub struct PageFields {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<String>,
}

/// Result of one primary pass over the rendering session.
#[derive(Debug)]
struct PrimaryPass {
    fields: PageFields,
    body: Option<String>,
}

/// Article produced by the direct full-article fallback.
#[derive(Debug, Clone)]
pub struct FallbackArticle {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<String>,
    /// Always non-empty; an empty extraction yields `None` upstream.
    pub body: String,
}

/// Direct article fetch capability, independent of the rendering session.
///
/// `Ok(None)` means the source yielded nothing usable; network errors are
/// reported but both degrade the same way (keep the primary fields).
pub trait ArticleFetch {
    async fn fetch(&self, url: &str) -> Result<Option<FallbackArticle>, Box<dyn Error>>;
}

/// [`ArticleFetch`] over plain HTTP: fetch the URL directly and parse the
/// static HTML, collecting paragraph text as the article body.
pub struct HttpArticleFetch {
    client: reqwest::Client,
}

impl HttpArticleFetch {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let client = reqwest::Client::builder()
            .user_agent(crate::frontier::USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client })
    }
}

impl ArticleFetch for HttpArticleFetch {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<Option<FallbackArticle>, Box<dyn Error>> {
        let html = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let article = parse_fallback_article(&html);
        match &article {
            Some(a) => info!(words = word_count(&a.body), "Fallback extraction produced content"),
            None => warn!("Fallback extraction produced no content"),
        }
        Ok(article)
    }
}

/// Route one URL through the extraction strategy chain.
///
/// Always returns a complete record; the only error case is a session
/// (re)creation failure, which is terminal for the run segment.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn extract_post<F: ArticleFetch>(
    manager: &mut SessionManager,
    fallback: &F,
    url: &str,
) -> Result<Attempt, SessionError> {
    let timeout = manager.config().page_timeout;
    let mut recovered_once = false;

    loop {
        let session = manager.acquire()?;
        match attempt_primary(session, url, timeout) {
            Ok(primary) => return Ok(finish_attempt(url, primary, fallback).await),
            Err(SessionError::Timeout) => {
                warn!("Timed out loading page; emitting placeholder record");
                return Ok(Attempt::Placeholder(
                    PostRecord::placeholder(url),
                    PlaceholderReason::Timeout,
                ));
            }
            Err(SessionError::Fatal(message)) => {
                if recovered_once {
                    error!(%message, "Second session-fatal error for this URL; giving up");
                    return Ok(Attempt::Placeholder(
                        PostRecord::placeholder(url),
                        PlaceholderReason::SessionFatal,
                    ));
                }
                warn!(%message, "Session-fatal error; recovering and restarting attempt");
                recovered_once = true;
                manager.recover_from_fatal().await?;
            }
            Err(e) => {
                error!(error = %e, "Extraction attempt failed; emitting placeholder record");
                return Ok(Attempt::Placeholder(
                    PostRecord::placeholder(url),
                    PlaceholderReason::Unexpected,
                ));
            }
        }
    }
}

/// `Start → PageLoaded → FieldsParsed → ContentChecked` against the session.
fn attempt_primary(
    session: &mut dyn RenderSession,
    url: &str,
    timeout: Duration,
) -> Result<PrimaryPass, SessionError> {
    session.navigate(url)?;
    session.wait_for_ready(timeout)?;

    let html = session.page_html()?;
    let fields = parse_fields(&html);
    let body = read_content(session)?;
    Ok(PrimaryPass { fields, body })
}

/// Try the content selectors in order; first non-empty rendered text wins.
fn read_content(session: &mut dyn RenderSession) -> Result<Option<String>, SessionError> {
    for selector in CONTENT_SELECTORS {
        match session.visible_text(selector) {
            Ok(Some(text)) if !text.trim().is_empty() => {
                debug!(selector, "Content selector matched");
                return Ok(Some(text));
            }
            Ok(_) => continue,
            // A broken selector read is attempt-local; session death is not.
            Err(e @ (SessionError::Fatal(_) | SessionError::Timeout)) => return Err(e),
            Err(e) => {
                debug!(selector, error = %e, "Content selector failed; trying next");
                continue;
            }
        }
    }
    warn!("No content selector matched");
    Ok(None)
}

/// `ContentChecked → {Accepted | FallbackTried} → Terminal`.
async fn finish_attempt<F: ArticleFetch>(
    url: &str,
    primary: PrimaryPass,
    fallback: &F,
) -> Attempt {
    let mut record = PostRecord::placeholder(url);
    if let Some(title) = primary.fields.title {
        record.title = title;
    }
    if let Some(summary) = primary.fields.summary {
        record.summary = summary;
    }
    if let Some(published_at) = primary.fields.published_at {
        record.published_at = published_at;
    }

    match primary.body {
        Some(body) if word_count(&body) >= MIN_BODY_WORDS => {
            record.body = body;
            info!("Primary extraction accepted");
            Attempt::Success(record)
        }
        thin_body => {
            warn!("Primary content missing or under the word threshold; trying fallback");
            match fallback.fetch(url).await {
                Ok(Some(article)) => {
                    // The fallback result is considered more reliable than a
                    // failed primary pass: it overwrites all four fields.
                    record.title = article
                        .title
                        .unwrap_or_else(|| crate::models::TITLE_UNAVAILABLE.to_string());
                    record.summary = article
                        .summary
                        .unwrap_or_else(|| crate::models::SUMMARY_UNAVAILABLE.to_string());
                    record.published_at = article
                        .published_at
                        .unwrap_or_else(|| crate::models::DATE_UNAVAILABLE.to_string());
                    info!(
                        words = word_count(&article.body),
                        preview = %truncate_for_log(&article.body, 120),
                        "Fallback extraction accepted"
                    );
                    record.body = article.body;
                    Attempt::Success(record)
                }
                Ok(None) => {
                    if let Some(body) = thin_body {
                        record.body = body;
                    }
                    Attempt::Placeholder(record, PlaceholderReason::ThinContent)
                }
                Err(e) => {
                    warn!(error = %e, "Fallback fetch failed; keeping primary fields");
                    if let Some(body) = thin_body {
                        record.body = body;
                    }
                    Attempt::Placeholder(record, PlaceholderReason::ThinContent)
                }
            }
        }
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Parse title, summary and publish date from rendered HTML.
pub fn parse_fields(html: &str) -> PageFields {
    let document = Html::parse_document(html);
    PageFields {
        title: parse_title(&document),
        summary: parse_summary(&document),
        published_at: parse_published(&document),
    }
}

/// First-level heading text, else `og:title` meta content.
fn parse_title(document: &Html) -> Option<String> {
    let h1 = Selector::parse("h1").unwrap();
    if let Some(element) = document.select(&h1).next() {
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    let og_title = Selector::parse(r#"meta[property="og:title"]"#).unwrap();
    document
        .select(&og_title)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

/// `description` meta content.
fn parse_summary(document: &Html) -> Option<String> {
    let description = Selector::parse(r#"meta[name="description"]"#).unwrap();
    document
        .select(&description)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

/// Publish date: structured meta, then `<time datetime>`, then a best-effort
/// scan of visible text blocks against the literal date patterns.
fn parse_published(document: &Html) -> Option<String> {
    let published_meta = Selector::parse(r#"meta[property="article:published_time"]"#).unwrap();
    if let Some(content) = document
        .select(&published_meta)
        .next()
        .and_then(|el| el.value().attr("content"))
    {
        match normalize_iso_timestamp(content) {
            Some(formatted) => return Some(formatted),
            None => warn!("Invalid publish-time format in meta tag"),
        }
    }

    let time_tag = Selector::parse("time[datetime]").unwrap();
    if let Some(datetime) = document
        .select(&time_tag)
        .next()
        .and_then(|el| el.value().attr("datetime"))
    {
        match normalize_iso_timestamp(datetime) {
            Some(formatted) => return Some(formatted),
            None => warn!("Invalid datetime format in time element"),
        }
    }

    let text_blocks = Selector::parse("p, span, div, li").unwrap();
    for element in document.select(&text_blocks) {
        let text = element.text().collect::<Vec<_>>().join(" ");
        for pattern in DATE_PATTERNS.iter() {
            if let Some(found) = pattern.find(&text) {
                debug!(date = found.as_str(), "Date found in visible text");
                return Some(found.as_str().to_string());
            }
        }
    }
    None
}

/// Normalize an ISO8601 timestamp (`Z` or explicit offset, or a bare date)
/// to `%Y-%m-%d %H:%M:%S`.
fn normalize_iso_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(format!("{} 00:00:00", date.format("%Y-%m-%d")));
    }
    None
}

/// Parse a directly-fetched page into a fallback article, collecting
/// paragraph text from the most article-like scope available.
pub fn parse_fallback_article(html: &str) -> Option<FallbackArticle> {
    let document = Html::parse_document(html);
    let fields = PageFields {
        title: parse_title(&document),
        summary: parse_summary(&document),
        published_at: parse_published(&document),
    };

    let mut body = String::new();
    for scope in ["article p", "main p", "body p"] {
        let paragraphs = Selector::parse(scope).unwrap();
        let collected: Vec<String> = document
            .select(&paragraphs)
            .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .filter(|text| !text.is_empty())
            .collect();
        if !collected.is_empty() {
            body = collected.join("\n");
            break;
        }
    }

    if body.trim().is_empty() {
        return None;
    }
    Some(FallbackArticle {
        title: fields.title,
        summary: fields.summary,
        published_at: fields.published_at,
        body,
    })
}
