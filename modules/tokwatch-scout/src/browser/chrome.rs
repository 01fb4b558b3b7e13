// Headless Chromium session built on `--dump-dom`.
//
// Every render launches a fresh Chromium with a throwaway profile directory,
// so no cookies or storage survive from one account to the next.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{document_has, BrowserSession, SessionError};

/// Max launch attempts when the OS refuses to spawn Chromium.
const CHROME_LAUNCH_ATTEMPTS: u32 = 2;
/// Base backoff for launch retries. Actual delay is base * 3^attempt + jitter.
const CHROME_RETRY_BASE: Duration = Duration::from_secs(1);
/// Virtual time granted to the first render. Doubled on each re-render
/// while waiting for a selector.
const INITIAL_RENDER_BUDGET: Duration = Duration::from_secs(5);
/// Floor for a single render so a nearly-spent deadline still gets one try.
const MIN_RENDER_BUDGET: Duration = Duration::from_millis(500);

enum DumpError {
    TimedOut,
    Failed(String),
}

struct LoadedPage {
    url: String,
    html: String,
}

pub struct ChromeSession {
    chrome_bin: String,
    user_agent: String,
    proxy: Option<String>,
    current: Option<LoadedPage>,
}

impl ChromeSession {
    pub fn new(chrome_bin: &str, user_agent: &str, proxy: Option<&str>) -> Self {
        info!(chrome_bin, proxy = proxy.is_some(), "ChromeSession initialized");
        Self {
            chrome_bin: chrome_bin.to_string(),
            user_agent: user_agent.to_string(),
            proxy: proxy.map(String::from),
            current: None,
        }
    }

    /// Launch Chromium `--dump-dom` against `url` and return the serialized DOM.
    async fn dump_dom(
        &self,
        url: &str,
        timeout: Duration,
        render_budget: Duration,
    ) -> Result<String, DumpError> {
        let parsed = url::Url::parse(url).map_err(|e| DumpError::Failed(format!("invalid URL: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(DumpError::Failed(format!(
                "only http/https URLs allowed, got: {}",
                parsed.scheme()
            )));
        }

        for attempt in 0..CHROME_LAUNCH_ATTEMPTS {
            let tmp_dir = tempfile::tempdir()
                .map_err(|e| DumpError::Failed(format!("failed to create temp profile dir: {e}")))?;

            let mut args = vec![
                "--headless".to_string(),
                "--no-sandbox".to_string(),
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
                format!("--user-data-dir={}", tmp_dir.path().display()),
                format!("--user-agent={}", self.user_agent),
                format!("--virtual-time-budget={}", render_budget.as_millis()),
            ];
            if let Some(ref proxy) = self.proxy {
                args.push(format!("--proxy-server={proxy}"));
            }
            args.push("--dump-dom".to_string());
            args.push(url.to_string());

            let result = tokio::time::timeout(
                timeout,
                tokio::process::Command::new(&self.chrome_bin)
                    .args(&args)
                    .kill_on_drop(true)
                    .output(),
            )
            .await;

            match result {
                Ok(Ok(output)) if output.status.success() => {
                    return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
                }
                Ok(Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    if is_transient_error(&stderr) && attempt + 1 < CHROME_LAUNCH_ATTEMPTS {
                        warn!(url, attempt = attempt + 1, "Chrome could not start, retrying");
                        retry_with_backoff(attempt).await;
                        continue;
                    }
                    return Err(DumpError::Failed(format!("Chrome exited with error: {stderr}")));
                }
                Ok(Err(e)) => {
                    let msg = e.to_string();
                    if is_transient_error(&msg) && attempt + 1 < CHROME_LAUNCH_ATTEMPTS {
                        warn!(url, attempt = attempt + 1, error = %e, "Chrome launch failed, retrying");
                        retry_with_backoff(attempt).await;
                        continue;
                    }
                    return Err(DumpError::Failed(format!("failed to run Chrome: {e}")));
                }
                Err(_) => return Err(DumpError::TimedOut),
            }
        }

        Err(DumpError::Failed("Chrome launch attempts exhausted".to_string()))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        self.current = None;
        info!(url, fetcher = "chrome", "Loading page");

        let html = self
            .dump_dom(url, timeout, INITIAL_RENDER_BUDGET)
            .await
            .map_err(|e| match e {
                DumpError::TimedOut => SessionError::NavigationTimeout {
                    url: url.to_string(),
                    timeout,
                },
                DumpError::Failed(msg) => SessionError::Browser(msg),
            })?;

        if html.is_empty() {
            warn!(url, fetcher = "chrome", "Empty DOM output");
        }
        debug!(url, bytes = html.len(), "Page loaded");

        self.current = Some(LoadedPage {
            url: url.to_string(),
            html,
        });
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        let mut render_budget = INITIAL_RENDER_BUDGET * 2;

        loop {
            let page = self.current.as_ref().ok_or(SessionError::NoDocument)?;
            if document_has(&page.html, selector)? {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::ReadinessTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }

            let url = page.url.clone();
            let budget = render_budget.min(remaining).max(MIN_RENDER_BUDGET);
            debug!(url = url.as_str(), selector, budget_ms = budget.as_millis() as u64, "Selector not rendered yet, re-rendering");

            match self.dump_dom(&url, remaining, budget).await {
                Ok(html) => {
                    self.current = Some(LoadedPage { url, html });
                }
                Err(DumpError::TimedOut) => {
                    return Err(SessionError::ReadinessTimeout {
                        selector: selector.to_string(),
                        timeout,
                    });
                }
                Err(DumpError::Failed(msg)) => return Err(SessionError::Browser(msg)),
            }
            render_budget *= 2;
        }
    }

    fn content(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.html.as_str())
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.current = None;
        Ok(())
    }
}

fn is_transient_error(msg: &str) -> bool {
    msg.contains("Cannot fork") || msg.contains("Resource temporarily unavailable")
}

async fn retry_with_backoff(attempt: u32) {
    let backoff = CHROME_RETRY_BASE * 3u32.pow(attempt);
    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
    tokio::time::sleep(backoff + jitter).await;
}
