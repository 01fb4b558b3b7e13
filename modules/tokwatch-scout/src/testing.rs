// Test doubles for the scout pipeline.
//
// - MockBrowser (BrowserSession): scripted responses per URL, no Chromium.
// - ProfileFixture / PostFixture: build profile-page HTML the way the live
//   site marks it up.
// - RecordingOverride (ManualOverride): counts operator pauses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokwatch_common::Account;

use crate::account::AccountError;
use crate::browser::{document_has, BrowserSession, SessionError};
use crate::recovery::ManualOverride;

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

/// One scripted response to a `goto`.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Page loads with this HTML. Readiness succeeds iff the post list is in it.
    Page(String),
    NavigationTimeout,
    /// Page loads but the readiness marker never appears.
    NeverReady,
    /// Navigation never completes; only an outer timeout ends it.
    Hang,
    /// Browser-level failure that is not a timeout.
    Crash(String),
}

/// Shared log of what the browser was asked to do.
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub visits: Vec<String>,
    pub resets: usize,
}

/// Scripted browser. Responses for a URL are consumed in order; the last
/// one repeats. Unscripted URLs crash.
pub struct MockBrowser {
    scripts: HashMap<String, VecDeque<MockResponse>>,
    current: Option<String>,
    log: Arc<Mutex<BrowserLog>>,
    fail_resets: bool,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            current: None,
            log: Arc::new(Mutex::new(BrowserLog::default())),
            fail_resets: false,
        }
    }

    /// Every `reset` reports failure, as a browser that lost its context would.
    pub fn failing_resets(mut self) -> Self {
        self.fail_resets = true;
        self
    }

    /// Script responses for an account's profile URL.
    pub fn on_account(mut self, handle: &str, responses: Vec<MockResponse>) -> Self {
        let url = format!("https://www.tiktok.com/@{handle}");
        self.scripts.insert(url, responses.into());
        self
    }

    pub fn log(&self) -> Arc<Mutex<BrowserLog>> {
        Arc::clone(&self.log)
    }

    fn next_response(&mut self, url: &str) -> MockResponse {
        match self.scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| MockResponse::Crash("empty script".into())),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| MockResponse::Crash("empty script".into())),
            None => MockResponse::Crash(format!("no script for {url}")),
        }
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        self.current = None;
        if let Ok(mut log) = self.log.lock() {
            log.visits.push(url.to_string());
        }

        match self.next_response(url) {
            MockResponse::Page(html) => {
                self.current = Some(html);
                Ok(())
            }
            MockResponse::NeverReady => {
                self.current = Some("<html><body><div id=\"captcha\"></div></body></html>".into());
                Ok(())
            }
            MockResponse::NavigationTimeout => Err(SessionError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
            MockResponse::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            MockResponse::Crash(msg) => Err(SessionError::Browser(msg)),
        }
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let html = self.current.as_deref().ok_or(SessionError::NoDocument)?;
        if document_has(html, selector)? {
            Ok(())
        } else {
            Err(SessionError::ReadinessTimeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    fn content(&self) -> Option<&str> {
        self.current.as_deref()
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.current = None;
        if let Ok(mut log) = self.log.lock() {
            log.resets += 1;
        }
        if self.fail_resets {
            return Err(SessionError::Browser("context could not be cleared".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingOverride
// ---------------------------------------------------------------------------

/// Records which accounts the operator would have been asked about.
#[derive(Default)]
pub struct RecordingOverride {
    pub calls: Arc<Mutex<Vec<String>>>,
    unanswered: bool,
}

impl RecordingOverride {
    /// An operator who never acknowledges: `on_blocked` records the call
    /// and then never returns.
    pub fn unanswered() -> Self {
        Self {
            unanswered: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ManualOverride for RecordingOverride {
    async fn on_blocked(&self, account: &Account, _error: &AccountError) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(account.handle().to_string());
        }
        if self.unanswered {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// HTML fixtures
// ---------------------------------------------------------------------------

/// Snowflake-style post id whose upper 32 bits are `epoch_secs`.
pub fn post_id_at(epoch_secs: u32, low_bits: u32) -> u64 {
    ((epoch_secs as u64) << 32) | low_bits as u64
}

#[derive(Debug, Clone)]
pub struct PostFixture {
    href: Option<String>,
    pinned: bool,
    views: Option<String>,
}

impl PostFixture {
    /// A post linking to `/@{handle}/video/{id}`.
    pub fn video(handle: &str, id: u64) -> Self {
        Self {
            href: Some(format!("https://www.tiktok.com/@{handle}/video/{id}")),
            pinned: false,
            views: Some("1000".to_string()),
        }
    }

    /// A post with an arbitrary link.
    pub fn with_href(href: &str) -> Self {
        Self {
            href: Some(href.to_string()),
            pinned: false,
            views: Some("1000".to_string()),
        }
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn views(mut self, views: &str) -> Self {
        self.views = Some(views.to_string());
        self
    }

    pub fn without_views(mut self) -> Self {
        self.views = None;
        self
    }

    pub fn without_link(mut self) -> Self {
        self.href = None;
        self
    }

    fn html(&self) -> String {
        let badge = if self.pinned {
            r#"<div data-e2e="video-card-pinned">Pinned</div>"#
        } else {
            ""
        };
        let views = self
            .views
            .as_deref()
            .map(|v| format!(r#"<strong data-e2e="video-views">{v}</strong>"#))
            .unwrap_or_default();
        let body = match &self.href {
            Some(href) => format!(r#"<a href="{href}">{badge}{views}</a>"#),
            None => format!("<div>{badge}{views}</div>"),
        };
        format!(r#"<div data-e2e="user-post-item">{body}</div>"#)
    }
}

#[derive(Debug, Clone)]
pub struct ProfileFixture {
    title: Option<String>,
    nickname: Option<String>,
    posts: Vec<PostFixture>,
}

impl ProfileFixture {
    /// A profile whose displayed handle is `@{handle}`.
    pub fn new(handle: &str) -> Self {
        Self {
            title: Some(format!("@{handle}")),
            nickname: None,
            posts: Vec::new(),
        }
    }

    pub fn displayed_handle(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn without_displayed_handle(mut self) -> Self {
        self.title = None;
        self
    }

    pub fn nickname(mut self, nickname: &str) -> Self {
        self.nickname = Some(nickname.to_string());
        self
    }

    pub fn post(mut self, post: PostFixture) -> Self {
        self.posts.push(post);
        self
    }

    pub fn html(&self) -> String {
        let title = self
            .title
            .as_deref()
            .map(|t| format!(r#"<h1 data-e2e="user-title">{t}</h1>"#))
            .unwrap_or_default();
        let nickname = self
            .nickname
            .as_deref()
            .map(|n| format!(r#"<h2 data-e2e="user-subtitle">{n}</h2>"#))
            .unwrap_or_default();
        let posts: String = self.posts.iter().map(PostFixture::html).collect();
        format!(
            r#"<!DOCTYPE html><html><head><title>TikTok</title></head><body>
<div class="header">{title}{nickname}</div>
<div data-e2e="user-post-item-list">{posts}</div>
</body></html>"#
        )
    }

    pub fn page(&self) -> MockResponse {
        MockResponse::Page(self.html())
    }
}
