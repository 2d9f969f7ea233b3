//! Headless-Chromium transport using chromiumoxide.

use super::{ClickTarget, Driver, DriverError, DriverResult, PageSession};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll interval for element and readiness waits.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. TAXPROBE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("TAXPROBE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.taxprobe/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".taxprobe/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".taxprobe/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".taxprobe/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".taxprobe/chromium/chrome-linux64/chrome"),
                home.join(".taxprobe/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// One headless Chromium process; hands out single-tab sessions.
pub struct ChromiumDriver {
    browser: Browser,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumDriver {
    /// Launch a headless Chromium instance.
    pub async fn launch() -> anyhow::Result<Self> {
        let chrome_path = find_chromium()
            .ok_or_else(|| anyhow::anyhow!("Chromium not found. Run `taxprobe doctor`."))?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config).await?;

        // Drain CDP events for the browser's lifetime.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn new_session(&self) -> DriverResult<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Browser(format!("failed to create page: {e}")))?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumSession {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    fn active_sessions(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) -> DriverResult<()> {
        // Browser process exits when ChromiumDriver is dropped.
        Ok(())
    }
}

/// A single Chromium tab.
pub struct ChromiumSession {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumSession {
    /// Evaluate JS and deserialize the result, mapping failures to
    /// [`DriverError::Browser`].
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> DriverResult<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Browser(format!("JS evaluation failed: {e}")))?;
        result
            .into_value()
            .map_err(|e| DriverError::Browser(format!("unexpected JS result: {e:?}")))
    }

    /// Wait for a selector to appear, polling until the deadline.
    async fn wait_for_element(
        &self,
        selector: &str,
        timeout_ms: u64,
    ) -> DriverResult<chromiumoxide::element::Element> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match self.page.find_element(selector).await {
                Ok(el) => return Ok(el),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(_) => return Err(DriverError::Timeout(timeout_ms)),
            }
        }
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn open(&mut self, url: &str, timeout_ms: u64) -> DriverResult<()> {
        let nav = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.page.goto(url.to_string()),
        )
        .await;

        match nav {
            Ok(Ok(_)) => {
                // Best effort: the settle wait covers late renders.
                let _ = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    self.page.wait_for_navigation(),
                )
                .await;
                Ok(())
            }
            Ok(Err(e)) => Err(DriverError::Navigation(format!("{e}"))),
            Err(_) => Err(DriverError::Timeout(timeout_ms)),
        }
    }

    async fn fill(&mut self, selector: &str, value: &str, timeout_ms: u64) -> DriverResult<()> {
        let element = self.wait_for_element(selector, timeout_ms).await?;
        let typing = async {
            element
                .click()
                .await
                .map_err(|e| DriverError::Browser(format!("focus {selector:?} failed: {e}")))?;
            element
                .type_str(value)
                .await
                .map_err(|e| DriverError::Browser(format!("fill {selector:?} failed: {e}")))?;
            Ok(())
        };
        tokio::time::timeout(Duration::from_millis(timeout_ms), typing)
            .await
            .map_err(|_| DriverError::Timeout(timeout_ms))?
    }

    async fn click(&mut self, target: &ClickTarget, timeout_ms: u64) -> DriverResult<()> {
        match target {
            ClickTarget::Selector(selector) => {
                let element = self.wait_for_element(selector, timeout_ms).await?;
                let click = element.click();
                tokio::time::timeout(Duration::from_millis(timeout_ms), click)
                    .await
                    .map_err(|_| DriverError::Timeout(timeout_ms))?
                    .map(|_| ())
                    .map_err(|e| DriverError::Browser(format!("click {selector:?} failed: {e}")))
            }
            ClickTarget::Text(text) => {
                // No stable selector: find the first clickable element whose
                // visible text contains the needle.
                let needle = serde_json::to_string(&text.to_lowercase())
                    .unwrap_or_else(|_| "\"\"".into());
                let script = format!(
                    "(() => {{ \
                       const needle = {needle}; \
                       const els = Array.from(document.querySelectorAll(\
                         'a, button, input[type=submit], input[type=button]')); \
                       const el = els.find(e => \
                         ((e.innerText || e.value || '') + '').toLowerCase().includes(needle)); \
                       if (el) {{ el.click(); return true; }} \
                       return false; \
                     }})()"
                );
                let clicked: bool = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    self.eval::<bool>(&script),
                )
                .await
                .map_err(|_| DriverError::Timeout(timeout_ms))??;
                if clicked {
                    Ok(())
                } else {
                    Err(DriverError::MissingElement(format!("{target}")))
                }
            }
        }
    }

    async fn press_enter(&mut self, selector: &str, timeout_ms: u64) -> DriverResult<()> {
        // Submit the form owning the input, the way Enter would.
        let escaped = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into());
        let script = format!(
            "(() => {{ \
               const el = document.querySelector({escaped}); \
               if (el && el.form) {{ \
                 el.form.requestSubmit ? el.form.requestSubmit() : el.form.submit(); \
                 return true; \
               }} \
               return false; \
             }})()"
        );
        let submitted: bool = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.eval::<bool>(&script),
        )
        .await
        .map_err(|_| DriverError::Timeout(timeout_ms))??;
        if submitted {
            Ok(())
        } else {
            Err(DriverError::MissingElement(format!("form for {selector}")))
        }
    }

    async fn wait_settled(&mut self, quiescence_ms: u64, timeout_ms: u64) -> DriverResult<()> {
        let ready = async {
            loop {
                let state: String = self
                    .eval("document.readyState")
                    .await
                    .unwrap_or_else(|_| "loading".into());
                if state == "complete" {
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(Duration::from_millis(timeout_ms), ready)
            .await
            .map_err(|_| DriverError::Timeout(timeout_ms))?;

        // Fixed quiescence interval for client-side rendering that finishes
        // after the document is complete.
        if quiescence_ms > 0 {
            tokio::time::sleep(Duration::from_millis(quiescence_ms)).await;
        }
        Ok(())
    }

    async fn body_text(&self) -> DriverResult<String> {
        self.eval("document.body ? document.body.innerText : ''")
            .await
    }

    async fn html(&self) -> DriverResult<String> {
        self.eval("document.documentElement.outerHTML").await
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.page
            .url()
            .await
            .map_err(|e| DriverError::Browser(format!("{e}")))
            .map(|u| u.map(|u| u.to_string()).unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn navigate_fill_and_read() {
        let driver = ChromiumDriver::launch().await.expect("launch failed");
        let mut session = driver.new_session().await.expect("session failed");

        session
            .open(
                "data:text/html,<h1>Bill</h1><p>Total Billed: $8,314.00</p>",
                10_000,
            )
            .await
            .expect("open failed");
        session.wait_settled(0, 10_000).await.expect("settle failed");

        let text = session.body_text().await.expect("body_text failed");
        assert!(text.contains("Total Billed"));

        let html = session.html().await.expect("html failed");
        assert!(html.contains("<h1>Bill</h1>"));

        session.close().await.expect("close failed");
        assert_eq!(driver.active_sessions(), 0);
    }
}
