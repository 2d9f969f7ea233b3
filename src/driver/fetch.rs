//! Plain-HTTP transport using reqwest.
//!
//! Not a browser — a single GET per `open` with the body held as the page
//! snapshot. Serves `DirectUrl` strategies whose sites render server-side
//! (the Montgomery portal, for one). Form interaction is unsupported by
//! design and classifies as a descriptor authoring error upstream.

use super::{ClickTarget, Driver, DriverError, DriverResult, PageSession};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// HTTP transport; sessions share one connection pool.
pub struct HttpDriver {
    client: reqwest::Client,
    active_count: Arc<AtomicUsize>,
}

impl HttpDriver {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Driver for HttpDriver {
    async fn new_session(&self) -> DriverResult<Box<dyn PageSession>> {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            url: String::new(),
            body: None,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_sessions(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) -> DriverResult<()> {
        Ok(())
    }
}

/// One fetched page held in memory.
pub struct HttpSession {
    client: reqwest::Client,
    url: String,
    body: Option<String>,
    active_count: Arc<AtomicUsize>,
}

impl HttpSession {
    fn page(&self) -> DriverResult<&str> {
        self.body
            .as_deref()
            .ok_or_else(|| DriverError::Navigation("no page loaded".into()))
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn open(&mut self, url: &str, timeout_ms: u64) -> DriverResult<()> {
        let request = self
            .client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send();
        let response = tokio::time::timeout(Duration::from_millis(timeout_ms), request)
            .await
            .map_err(|_| DriverError::Timeout(timeout_ms))?
            .map_err(|e| {
                if e.is_timeout() {
                    DriverError::Timeout(timeout_ms)
                } else {
                    DriverError::Navigation(format!("{e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Navigation(format!("HTTP {status} for {url}")));
        }

        self.url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| DriverError::Navigation(format!("body read failed: {e}")))?;
        self.body = Some(body);
        Ok(())
    }

    async fn fill(&mut self, _selector: &str, _value: &str, _timeout_ms: u64) -> DriverResult<()> {
        Err(DriverError::Unsupported("fill over HTTP transport"))
    }

    async fn click(&mut self, _target: &ClickTarget, _timeout_ms: u64) -> DriverResult<()> {
        Err(DriverError::Unsupported("click over HTTP transport"))
    }

    async fn press_enter(&mut self, _selector: &str, _timeout_ms: u64) -> DriverResult<()> {
        Err(DriverError::Unsupported("form submit over HTTP transport"))
    }

    async fn wait_settled(&mut self, _quiescence_ms: u64, _timeout_ms: u64) -> DriverResult<()> {
        // Nothing renders client-side; the body is already final.
        Ok(())
    }

    async fn body_text(&self) -> DriverResult<String> {
        let html = self.page()?;
        Ok(visible_text(html))
    }

    async fn html(&self) -> DriverResult<String> {
        self.page().map(|s| s.to_string())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.url.clone())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Derive line-oriented visible text from raw HTML, approximating what a
/// browser's `innerText` would yield for label scanning.
fn visible_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let mut out = String::new();
    if let Ok(selector) = scraper::Selector::parse("body") {
        if let Some(body) = document.select(&selector).next() {
            for chunk in body.text() {
                let trimmed = chunk.trim();
                if !trimmed.is_empty() {
                    out.push_str(trimmed);
                    out.push('\n');
                }
            }
            return out;
        }
    }
    // Fragment without a <body>: fall back to all text nodes.
    for chunk in document.root_element().text() {
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            out.push_str(trimmed);
            out.push('\n');
        }
    }
    out
}
