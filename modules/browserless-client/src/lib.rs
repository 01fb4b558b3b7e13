pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;

/// Extra time granted to the HTTP request on top of the page-side deadlines,
/// so Browserless gets to report its own timeout instead of us cutting it off.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    proxy: Option<String>,
}

/// Per-request rendering options for the `/content` endpoint.
#[derive(Debug, Clone, Default)]
pub struct ContentOptions {
    pub goto_timeout: Option<Duration>,
    pub wait_for_selector: Option<(String, Duration)>,
    pub user_agent: Option<String>,
}

impl ContentOptions {
    pub fn goto_timeout(mut self, timeout: Duration) -> Self {
        self.goto_timeout = Some(timeout);
        self
    }

    pub fn wait_for_selector(mut self, selector: &str, timeout: Duration) -> Self {
        self.wait_for_selector = Some((selector.to_string(), timeout));
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    fn request_timeout(&self) -> Duration {
        let goto = self.goto_timeout.unwrap_or(Duration::from_secs(30));
        let wait = self
            .wait_for_selector
            .as_ref()
            .map(|(_, t)| *t)
            .unwrap_or_default();
        goto + wait + REQUEST_SLACK
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentBody<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    goto_options: Option<GotoOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<WaitForSelector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct WaitForSelector<'a> {
    selector: &'a str,
    timeout: u64,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        // Proxying applies to the remote browser (`--proxy-server`), not to
        // the API calls, so ignore HTTP_PROXY and friends here.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| BrowserlessError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            proxy: None,
        })
    }

    /// Route the remote browser through a proxy (`--proxy-server` launch flag).
    pub fn with_proxy(mut self, proxy: Option<&str>) -> Self {
        self.proxy = proxy.map(String::from);
        self
    }

    /// Fetch fully-rendered HTML content for a URL via Browserless /content endpoint.
    pub async fn content(&self, url: &str, options: &ContentOptions) -> Result<String> {
        let endpoint = format!("{}/content", self.base_url);

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(ref token) = self.token {
            query.push(("token", token));
        }
        if let Some(ref proxy) = self.proxy {
            query.push(("--proxy-server", proxy));
        }

        let body = ContentBody {
            url,
            goto_options: options.goto_timeout.map(|t| GotoOptions {
                wait_until: "domcontentloaded",
                timeout: t.as_millis() as u64,
            }),
            wait_for_selector: options
                .wait_for_selector
                .as_ref()
                .map(|(selector, t)| WaitForSelector {
                    selector,
                    timeout: t.as_millis() as u64,
                }),
            user_agent: options.user_agent.as_deref(),
        };

        tracing::debug!(url, endpoint = %endpoint, "Browserless content request");

        let resp = self
            .client
            .post(&endpoint)
            .query(&query)
            .timeout(options.request_timeout())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}
