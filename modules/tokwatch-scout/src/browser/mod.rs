// Browser session boundary.
//
// One session is owned by the run and lent to each account visit in turn.
// Implementations must not carry page state from one account into the next
// once `reset()` has been called.

mod browserless;
mod chrome;

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

pub use browserless::BrowserlessSession;
pub use chrome::ChromeSession;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Selector {selector} did not render within {timeout:?}")]
    ReadinessTimeout { selector: String, timeout: Duration },

    #[error("No page has been loaded in this session")]
    NoDocument,

    #[error("Browser error: {0}")]
    Browser(String),
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url`, replacing the current document.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Wait until the current document contains a match for `selector`.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    /// Rendered HTML of the current document.
    fn content(&self) -> Option<&str>;

    /// Drop everything learned about the previous account's page.
    async fn reset(&mut self) -> Result<(), SessionError>;
}

/// Whether `html` contains at least one element matching `selector`.
pub fn document_has(html: &str, selector: &str) -> Result<bool, SessionError> {
    let selector = Selector::parse(selector)
        .map_err(|e| SessionError::Browser(format!("invalid selector {selector}: {e}")))?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}
