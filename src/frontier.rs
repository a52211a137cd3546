//! URL frontier: sitemap discovery and candidate computation.
//!
//! The frontier fetches the blog sitemap, extracts every `<loc>` entry,
//! keeps only blog-post URLs (`/blog/<slug>/`), deduplicates them preserving
//! first-seen order, and subtracts the URLs a previous run already processed.
//!
//! Network and parse failures fail soft: the run proceeds with zero
//! candidates rather than aborting, so a flaky sitemap endpoint never takes
//! the pipeline down.

use itertools::Itertools;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Browser-like user agent; some sitemap endpoints reject obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/100.0.4896.127 Safari/537.36";

const SITEMAP_TIMEOUT: Duration = Duration::from_secs(10);

/// A blog post URL: a `/blog/` path segment followed by a non-empty slug and
/// a trailing slash.
static BLOG_POST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/blog/[^/]+/").expect("valid blog post pattern"));

/// Discover blog post URLs from the sitemap.
///
/// Fetches the sitemap with a bounded timeout, then filters and deduplicates
/// the location entries. Any network or HTTP failure is logged and yields an
/// empty sequence.
#[instrument(level = "info", skip_all, fields(sitemap_url = %sitemap_url))]
pub async fn discover(sitemap_url: &str) -> Vec<String> {
    let xml = match fetch_sitemap(sitemap_url).await {
        Ok(xml) => xml,
        Err(e) => {
            warn!(error = %e, "Failed to download or read sitemap; proceeding with zero candidates");
            return Vec::new();
        }
    };

    let all_urls = match parse_locations(&xml) {
        Ok(urls) => urls,
        Err(e) => {
            warn!(error = %e, "Failed to parse sitemap XML; proceeding with zero candidates");
            return Vec::new();
        }
    };

    let blog_urls = filter_blog_urls(all_urls.clone());
    info!(
        total = all_urls.len(),
        blog_posts = blog_urls.len(),
        ignored = all_urls.len() - blog_urls.len(),
        "Filtered sitemap locations"
    );
    debug!(urls = ?blog_urls, "Discovered blog URLs");
    blog_urls
}

/// Filter discovered URLs down to those not yet in the history set.
///
/// Order is preserved from discovery order.
pub fn candidates(discovered: &[String], history: &HashSet<String>) -> Vec<String> {
    discovered
        .iter()
        .filter(|url| !history.contains(url.as_str()))
        .cloned()
        .collect()
}

async fn fetch_sitemap(sitemap_url: &str) -> Result<String, Box<dyn Error>> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(SITEMAP_TIMEOUT)
        .build()?;
    let response = client.get(sitemap_url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Extract every `<loc>` text value from a sitemap document.
fn parse_locations(xml: &str) -> Result<Vec<String>, Box<dyn Error>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut urls = Vec::new();
    let mut in_loc = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().as_ref() == b"loc" => in_loc = true,
            Event::End(e) if e.name().as_ref() == b"loc" => in_loc = false,
            Event::Text(t) if in_loc => {
                let loc = t.unescape()?.trim().to_string();
                if !loc.is_empty() {
                    urls.push(loc);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(urls)
}

/// Retain well-formed blog-post URLs and deduplicate preserving first-seen
/// order.
fn filter_blog_urls(all_urls: Vec<String>) -> Vec<String> {
    all_urls
        .into_iter()
        .filter(|url| match Url::parse(url) {
            Ok(_) => true,
            Err(e) => {
                debug!(%url, error = %e, "Skipping malformed sitemap location");
                false
            }
        })
        .filter(|url| BLOG_POST_PATTERN.is_match(url))
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://99app.com/blog/motorista/seguro-auto/</loc></url>
  <url><loc>https://99app.com/sobre/</loc></url>
  <url><loc>https://99app.com/blog/99pay/taxa-selic/</loc></url>
  <url><loc>https://99app.com/blog/motorista/seguro-auto/</loc></url>
  <url><loc>https://99app.com/blog/</loc></url>
</urlset>"#;

    #[test]
    fn test_parse_locations_extracts_all_entries() {
        let urls = parse_locations(SITEMAP).unwrap();
        assert_eq!(urls.len(), 5);
        assert_eq!(urls[0], "https://99app.com/blog/motorista/seguro-auto/");
        assert_eq!(urls[1], "https://99app.com/sobre/");
    }

    #[test]
    fn test_filter_keeps_only_blog_post_pattern() {
        let urls = parse_locations(SITEMAP).unwrap();
        let filtered = filter_blog_urls(urls);
        // "/blog/" alone and non-blog pages are excluded.
        assert_eq!(
            filtered,
            vec![
                "https://99app.com/blog/motorista/seguro-auto/".to_string(),
                "https://99app.com/blog/99pay/taxa-selic/".to_string(),
            ]
        );
    }

    #[test]
    fn test_filter_deduplicates_preserving_first_seen_order() {
        let urls = vec![
            "https://x/blog/b/".to_string(),
            "https://x/blog/a/".to_string(),
            "https://x/blog/b/".to_string(),
            "https://x/blog/a/".to_string(),
        ];
        let filtered = filter_blog_urls(urls);
        assert_eq!(
            filtered,
            vec!["https://x/blog/b/".to_string(), "https://x/blog/a/".to_string()]
        );
    }

    #[test]
    fn test_filter_drops_malformed_locations() {
        let urls = vec![
            "not-an-absolute-url/blog/slug/".to_string(),
            "https://x/blog/slug/".to_string(),
        ];
        assert_eq!(filter_blog_urls(urls), vec!["https://x/blog/slug/".to_string()]);
    }

    #[test]
    fn test_pattern_requires_slug_and_trailing_slash() {
        assert!(BLOG_POST_PATTERN.is_match("https://x/blog/slug/"));
        assert!(BLOG_POST_PATTERN.is_match("https://x/pt/blog/slug/extra"));
        assert!(!BLOG_POST_PATTERN.is_match("https://x/blog/"));
        assert!(!BLOG_POST_PATTERN.is_match("https://x/blog/slug"));
        assert!(!BLOG_POST_PATTERN.is_match("https://x/blogue/slug/"));
    }

    #[test]
    fn test_candidates_subtracts_history_preserving_order() {
        let discovered = vec![
            "https://x/blog/a/".to_string(),
            "https://x/blog/b/".to_string(),
            "https://x/blog/c/".to_string(),
        ];
        let history: HashSet<String> = ["https://x/blog/b/".to_string()].into_iter().collect();
        assert_eq!(
            candidates(&discovered, &history),
            vec!["https://x/blog/a/".to_string(), "https://x/blog/c/".to_string()]
        );
    }

    #[test]
    fn test_candidates_with_empty_history_returns_all() {
        let discovered = vec!["https://x/blog/a/".to_string()];
        assert_eq!(candidates(&discovered, &HashSet::new()), discovered);
    }

    #[test]
    fn test_parse_locations_handles_escaped_entities() {
        let xml = "<urlset><url><loc>https://x/blog/a-&amp;-b/</loc></url></urlset>";
        let urls = parse_locations(xml).unwrap();
        assert_eq!(urls, vec!["https://x/blog/a-&-b/".to_string()]);
    }
}
