// Browserless-backed session. Each render is a stateless /content call, so
// a reset only has to forget the locally cached document.

use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, ContentOptions};
use tracing::{debug, info, warn};

use super::{document_has, BrowserSession, SessionError};

struct LoadedPage {
    url: String,
    html: String,
    navigation_timeout: Duration,
}

pub struct BrowserlessSession {
    client: BrowserlessClient,
    user_agent: String,
    current: Option<LoadedPage>,
}

impl BrowserlessSession {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        user_agent: &str,
        proxy: Option<&str>,
    ) -> Result<Self, SessionError> {
        let client = BrowserlessClient::new(base_url, token)
            .map_err(|e| SessionError::Browser(e.to_string()))?
            .with_proxy(proxy);
        info!(base_url, proxy = proxy.is_some(), "BrowserlessSession initialized");
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            current: None,
        })
    }
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        self.current = None;
        info!(url, fetcher = "browserless", "Loading page");

        let options = ContentOptions::default()
            .goto_timeout(timeout)
            .user_agent(&self.user_agent);
        let html = self
            .client
            .content(url, &options)
            .await
            .map_err(|e| navigation_error(url, timeout, e))?;

        if html.is_empty() {
            warn!(url, fetcher = "browserless", "Empty HTML response");
        }
        debug!(url, bytes = html.len(), "Page loaded");

        self.current = Some(LoadedPage {
            url: url.to_string(),
            html,
            navigation_timeout: timeout,
        });
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let page = self.current.as_ref().ok_or(SessionError::NoDocument)?;
        if document_has(&page.html, selector)? {
            return Ok(());
        }

        debug!(url = page.url.as_str(), selector, "Selector not rendered yet, waiting server-side");
        let options = ContentOptions::default()
            .goto_timeout(page.navigation_timeout)
            .wait_for_selector(selector, timeout)
            .user_agent(&self.user_agent);

        let readiness_timeout = || SessionError::ReadinessTimeout {
            selector: selector.to_string(),
            timeout,
        };

        let html = match self.client.content(&page.url, &options).await {
            Ok(html) => html,
            Err(e) if e.is_timeout() => return Err(readiness_timeout()),
            Err(e) => return Err(SessionError::Browser(e.to_string())),
        };

        let found = document_has(&html, selector)?;
        let url = page.url.clone();
        let navigation_timeout = page.navigation_timeout;
        self.current = Some(LoadedPage {
            url,
            html,
            navigation_timeout,
        });

        if found {
            Ok(())
        } else {
            Err(readiness_timeout())
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

fn navigation_error(url: &str, timeout: Duration, err: BrowserlessError) -> SessionError {
    if err.is_timeout() {
        SessionError::NavigationTimeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        SessionError::Browser(err.to_string())
    }
}
