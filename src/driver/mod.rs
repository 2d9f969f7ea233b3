//! Browser-session abstraction for site automation.
//!
//! Defines the `Driver` and `PageSession` traits that abstract over the
//! transport (headless Chromium via chromiumoxide, or plain HTTP via reqwest
//! for sites that need no form interaction). Every session operation takes a
//! caller-supplied timeout and either completes within it or fails with
//! [`DriverError::Timeout`] — it never blocks indefinitely.

pub mod chromium;
pub mod fetch;

use async_trait::async_trait;
use thiserror::Error;

/// Faults a session operation can produce.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("operation timed out after {0}ms")]
    Timeout(u64),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    MissingElement(String),
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),
    #[error("browser fault: {0}")]
    Browser(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Where a click lands: a CSS selector, or the first visible element
/// containing the given text (some sites label their search buttons without
/// stable ids or classes).
#[derive(Debug, Clone)]
pub enum ClickTarget {
    Selector(String),
    Text(String),
}

impl std::fmt::Display for ClickTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClickTarget::Selector(s) => write!(f, "selector {s:?}"),
            ClickTarget::Text(t) => write!(f, "text {t:?}"),
        }
    }
}

/// A transport that can issue page sessions.
///
/// Sessions are exclusively owned: one task holds one session for the
/// task's duration, and the session is closed (not recycled) when the task
/// finishes, so stale form values or cached state never leak across tasks.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Issue a fresh session (one tab).
    async fn new_session(&self) -> DriverResult<Box<dyn PageSession>>;
    /// Number of sessions currently issued and not yet closed.
    fn active_sessions(&self) -> usize;
    /// Shut down the transport.
    async fn shutdown(&self) -> DriverResult<()>;
}

/// A single exclusively-owned page session.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate to a URL.
    async fn open(&mut self, url: &str, timeout_ms: u64) -> DriverResult<()>;
    /// Fill a form input matched by CSS selector.
    async fn fill(&mut self, selector: &str, value: &str, timeout_ms: u64) -> DriverResult<()>;
    /// Click an element.
    async fn click(&mut self, target: &ClickTarget, timeout_ms: u64) -> DriverResult<()>;
    /// Submit the form owning the given input, as pressing Enter would.
    async fn press_enter(&mut self, selector: &str, timeout_ms: u64) -> DriverResult<()>;
    /// Wait for the page to settle: document ready plus a fixed quiescence
    /// interval, since some sites finish rendering after network idle.
    async fn wait_settled(&mut self, quiescence_ms: u64, timeout_ms: u64) -> DriverResult<()>;
    /// Visible text of the page body.
    async fn body_text(&self) -> DriverResult<String>;
    /// Full page HTML.
    async fn html(&self) -> DriverResult<String>;
    /// Current URL after any redirects.
    async fn current_url(&self) -> DriverResult<String>;
    /// Close this session and release its resources.
    async fn close(self: Box<Self>) -> DriverResult<()>;
}
