//! Rendering session wrapper and lifecycle management.
//!
//! Blog pages require client-side rendering, so extraction runs against a
//! headless browser. The browser is wrapped behind the [`RenderSession`]
//! trait (navigate, wait for readiness, read rendered text) so the extraction
//! state machine never touches browser specifics and tests can substitute a
//! scripted session.
//!
//! The [`SessionManager`] owns at most one live session at a time and applies
//! the lifecycle policy:
//!
//! - **Recycle**: after a threshold of processed URLs (default 150) the
//!   session is closed and recreated after a cooldown, bounding memory growth
//!   of the long-lived rendering process.
//! - **Fatal recovery**: when the session handle becomes invalid mid-attempt,
//!   the broken session is closed (close errors ignored), the cooldown is
//!   waited, and a replacement is created. Callers invoke this at most once
//!   per extraction attempt.
//!
//! Session creation failure is terminal for the current run segment: the
//! caller stops consuming candidates and exits cleanly.

use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::frontier::USER_AGENT;

/// Errors surfaced by the rendering capability.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser could not be launched or a replacement tab created.
    #[error("failed to create rendering session: {0}")]
    Create(String),
    /// The session handle is no longer usable; a fresh session is required.
    #[error("rendering session is no longer usable: {0}")]
    Fatal(String),
    /// A bounded wait elapsed without the page becoming ready.
    #[error("timed out waiting for page readiness")]
    Timeout,
    /// Anything else; treated as an attempt-level failure, not session death.
    #[error("rendering error: {0}")]
    Other(String),
}

/// A stateful handle to a rendered page.
///
/// Exclusive ownership is enforced through `&mut self`: the pipeline is
/// single-threaded and the currently running extraction attempt is the only
/// user of the live session.
pub trait RenderSession {
    /// Navigate the session to `url`.
    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Wait (bounded) for the minimal DOM readiness signal, a `body` element.
    fn wait_for_ready(&mut self, timeout: Duration) -> Result<(), SessionError>;

    /// Full rendered HTML of the current page.
    fn page_html(&mut self) -> Result<String, SessionError>;

    /// Rendered visible text of the first element matching `selector`, with
    /// noise nodes (`script`, `style`, `aside`, `figcaption`) removed first.
    /// `None` when the selector matches nothing.
    fn visible_text(&mut self, selector: &str) -> Result<Option<String>, SessionError>;

    /// Best-effort teardown; errors are ignored by contract.
    fn close(&mut self) {}
}

/// Static per-run configuration for the rendering capability and its
/// lifecycle policy. Never varies per URL.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Recreate the session after this many processed URLs.
    pub recycle_after: usize,
    /// Pause between closing a session and creating its replacement, letting
    /// OS resources settle.
    pub cooldown: Duration,
    /// Bounded wait for page readiness during extraction.
    pub page_timeout: Duration,
    /// Fixed user-agent presented by the browser.
    pub user_agent: String,
    /// Fixed viewport.
    pub window_size: (u32, u32),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recycle_after: 150,
            cooldown: Duration::from_secs(3),
            page_timeout: Duration::from_secs(15),
            user_agent: USER_AGENT.to_string(),
            window_size: (1920, 1080),
        }
    }
}

/// [`RenderSession`] backed by a headless Chrome process.
pub struct ChromeSession {
    // The browser handle owns the child process; dropping it tears the
    // process down, so it must live as long as the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    /// Launch a headless browser with the fixed session configuration:
    /// headless, sandbox disabled, fixed viewport and user agent,
    /// certificate checks relaxed.
    pub fn launch(config: &SessionConfig) -> Result<Self, SessionError> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some(config.window_size))
            .ignore_certificate_errors(true)
            .idle_browser_timeout(Duration::from_secs(300))
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
            ])
            .build()
            .map_err(|e| SessionError::Create(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| SessionError::Create(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| SessionError::Create(e.to_string()))?;
        tab.set_user_agent(&config.user_agent, None, None)
            .map_err(|e| SessionError::Create(e.to_string()))?;

        info!("Headless browser session created");
        Ok(Self { _browser: browser, tab })
    }
}

/// Map a browser error onto the session taxonomy by inspecting its message.
/// The devtools transport reports session death as closed connections or
/// channels; bounded waits report elapsed timeouts.
fn classify_browser_error(context: &str, e: anyhow::Error) -> SessionError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("never came") {
        SessionError::Timeout
    } else if lower.contains("connection")
        || lower.contains("channel")
        || lower.contains("websocket")
        || lower.contains("closed")
        || lower.contains("no session")
    {
        SessionError::Fatal(format!("{context}: {message}"))
    } else {
        SessionError::Other(format!("{context}: {message}"))
    }
}

impl RenderSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.tab
            .navigate_to(url)
            .map(|_| ())
            .map_err(|e| classify_browser_error("navigate", e))
    }

    fn wait_for_ready(&mut self, timeout: Duration) -> Result<(), SessionError> {
        self.tab
            .wait_for_element_with_custom_timeout("body", timeout)
            .map(|_| ())
            .map_err(|e| classify_browser_error("wait for body", e))
    }

    fn page_html(&mut self) -> Result<String, SessionError> {
        self.tab
            .get_content()
            .map_err(|e| classify_browser_error("read page content", e))
    }

    fn visible_text(&mut self, selector: &str) -> Result<Option<String>, SessionError> {
        // Noise nodes are removed in the live DOM before reading innerText,
        // so the returned text matches what a reader would actually see.
        let quoted = serde_json::to_string(selector)
            .map_err(|e| SessionError::Other(format!("encode selector: {e}")))?;
        let expression = format!(
            r#"(() => {{
                const el = document.querySelector({quoted});
                if (!el) return null;
                el.querySelectorAll('script, style, aside, figcaption').forEach(n => n.remove());
                return el.innerText;
            }})()"#
        );
        let result = self
            .tab
            .evaluate(&expression, false)
            .map_err(|e| classify_browser_error("read rendered text", e))?;
        match result.value {
            Some(serde_json::Value::String(text)) => Ok(Some(text)),
            _ => Ok(None),
        }
    }
}

/// Creates fresh sessions under a fixed configuration.
pub type SessionFactory = Box<dyn Fn(&SessionConfig) -> Result<Box<dyn RenderSession>, SessionError>>;

/// Owns zero-or-one live [`RenderSession`] and applies the lifecycle policy.
pub struct SessionManager {
    factory: SessionFactory,
    config: SessionConfig,
    live: Option<Box<dyn RenderSession>>,
    used_since_recycle: usize,
}

impl SessionManager {
    pub fn new(config: SessionConfig, factory: SessionFactory) -> Self {
        Self { factory, config, live: None, used_since_recycle: 0 }
    }

    /// Manager backed by real headless Chrome sessions.
    pub fn with_chrome(config: SessionConfig) -> Self {
        Self::new(
            config,
            Box::new(|cfg| {
                ChromeSession::launch(cfg).map(|s| Box::new(s) as Box<dyn RenderSession>)
            }),
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// URLs processed since the session was last (re)created.
    pub fn usage(&self) -> usize {
        self.used_since_recycle
    }

    /// Hand out the live session, creating one if none exists.
    ///
    /// A creation failure here is terminal for the run segment; the caller
    /// must stop consuming candidates.
    pub fn acquire(&mut self) -> Result<&mut (dyn RenderSession + '_), SessionError> {
        if self.live.is_none() {
            info!("Creating rendering session");
            self.live = Some((self.factory)(&self.config)?);
        }
        self.live
            .as_deref_mut()
            .map(|s| s as &mut dyn RenderSession)
            .ok_or_else(|| SessionError::Create("session absent after creation".to_string()))
    }

    /// Record that one URL finished processing against the live session.
    pub fn note_processed(&mut self) {
        self.used_since_recycle += 1;
    }

    /// Recreate the session once the recycle threshold is reached.
    #[instrument(level = "info", skip_all)]
    pub async fn maybe_recycle(&mut self) -> Result<(), SessionError> {
        if self.live.is_some() && self.used_since_recycle >= self.config.recycle_after {
            info!(
                processed = self.used_since_recycle,
                threshold = self.config.recycle_after,
                "Recycling rendering session"
            );
            self.teardown();
            tokio::time::sleep(self.config.cooldown).await;
            self.live = Some((self.factory)(&self.config)?);
            self.used_since_recycle = 0;
        }
        Ok(())
    }

    /// Replace a session whose handle became invalid.
    ///
    /// The broken session is closed ignoring errors; after the cooldown a
    /// fresh one is created. Callers attempt this at most once per extraction
    /// attempt; a creation failure propagates and ends the run segment.
    #[instrument(level = "info", skip_all)]
    pub async fn recover_from_fatal(&mut self) -> Result<(), SessionError> {
        warn!("Rendering session died; creating a replacement");
        self.teardown();
        tokio::time::sleep(self.config.cooldown).await;
        self.live = Some((self.factory)(&self.config)?);
        self.used_since_recycle = 0;
        Ok(())
    }

    /// Close the live session, if any.
    pub fn shutdown(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.live.take() {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopSession;

    impl RenderSession for NoopSession {
        fn navigate(&mut self, _url: &str) -> Result<(), SessionError> {
            Ok(())
        }
        fn wait_for_ready(&mut self, _timeout: Duration) -> Result<(), SessionError> {
            Ok(())
        }
        fn page_html(&mut self) -> Result<String, SessionError> {
            Ok(String::new())
        }
        fn visible_text(&mut self, _selector: &str) -> Result<Option<String>, SessionError> {
            Ok(None)
        }
    }

    fn counting_manager(recycle_after: usize) -> (SessionManager, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let config = SessionConfig {
            recycle_after,
            cooldown: Duration::ZERO,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(
            config,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(NoopSession) as Box<dyn RenderSession>)
            }),
        );
        (manager, created)
    }

    #[tokio::test]
    async fn test_acquire_creates_session_once() {
        let (mut manager, created) = counting_manager(150);
        manager.acquire().unwrap();
        manager.acquire().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recycle_after_threshold_resets_counter() {
        let (mut manager, created) = counting_manager(3);
        manager.acquire().unwrap();
        for _ in 0..2 {
            manager.note_processed();
            manager.maybe_recycle().await.unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1, "below threshold, no recycle");

        manager.note_processed();
        manager.maybe_recycle().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2, "threshold reached, recycled");
        assert_eq!(manager.usage(), 0, "usage counter reset");
    }

    #[tokio::test]
    async fn test_recover_from_fatal_creates_replacement() {
        let (mut manager, created) = counting_manager(150);
        manager.acquire().unwrap();
        manager.note_processed();
        manager.recover_from_fatal().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(manager.usage(), 0);
    }

    #[tokio::test]
    async fn test_creation_failure_is_surfaced() {
        let config = SessionConfig { cooldown: Duration::ZERO, ..SessionConfig::default() };
        let mut manager = SessionManager::new(
            config,
            Box::new(|_| Err(SessionError::Create("no chrome binary".to_string()))),
        );
        assert!(matches!(manager.acquire(), Err(SessionError::Create(_))));
    }

    #[test]
    fn test_default_config_matches_policy() {
        let config = SessionConfig::default();
        assert_eq!(config.recycle_after, 150);
        assert_eq!(config.cooldown, Duration::from_secs(3));
        assert_eq!(config.page_timeout, Duration::from_secs(15));
        assert_eq!(config.window_size, (1920, 1080));
    }
}
