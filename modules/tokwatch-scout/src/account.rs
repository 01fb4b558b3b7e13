// One account visit: navigate, wait for the post grid, check identity,
// collect and extract posts, resolve freshness.
//
// A visit either produces a snapshot, finds no posts, or fails with an
// `AccountError`. Retrying and persisting are the caller's business.

use std::fmt;
use std::time::Duration;

use chrono::Local;
use scraper::Html;
use serde::{Deserialize, Serialize};
use tokwatch_common::{Account, AccountSnapshot};
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, SessionError};
use crate::extractor::extract_post;
use crate::page::{ProfilePage, ProfileSelectors, POST_LIST_SELECTOR};
use crate::resolver::resolve_last_update;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Navigating,
    AwaitingReady,
    ValidatingIdentity,
    Collecting,
    Extracting,
    Resolving,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Navigating => "navigating",
            SessionState::AwaitingReady => "awaiting_ready",
            SessionState::ValidatingIdentity => "validating_identity",
            SessionState::Collecting => "collecting",
            SessionState::Extracting => "extracting",
            SessionState::Resolving => "resolving",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Deadlines and limits for a single visit.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub navigation_timeout: Duration,
    pub ready_timeout: Duration,
    /// Max posts extracted per account (K).
    pub post_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(30),
            post_limit: 10,
        }
    }
}

/// Coarse failure class, as recorded in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NavigationTimeout,
    ReadinessTimeout,
    BudgetExceeded,
    Session,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("page did not load: {0}")]
    NavigationTimeout(#[source] SessionError),

    #[error("post list did not render: {0}")]
    ReadinessTimeout(#[source] SessionError),

    #[error("account visit exceeded its {budget:?} budget")]
    BudgetExceeded { budget: Duration },

    #[error("{state} failed: {source}")]
    Session {
        state: SessionState,
        #[source]
        source: SessionError,
    },
}

impl AccountError {
    /// Timeouts of any kind usually mean the remote side is challenging the
    /// browser; those are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AccountError::Session { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AccountError::NavigationTimeout(_) => FailureKind::NavigationTimeout,
            AccountError::ReadinessTimeout(_) => FailureKind::ReadinessTimeout,
            AccountError::BudgetExceeded { .. } => FailureKind::BudgetExceeded,
            AccountError::Session { .. } => FailureKind::Session,
        }
    }
}

#[derive(Debug)]
pub enum AccountOutcome {
    Captured(AccountSnapshot),
    /// Page loaded but showed no posts; nothing is written.
    NoPosts,
}

pub struct AccountSession<'a> {
    account: &'a Account,
    settings: &'a SessionSettings,
    selectors: &'a ProfileSelectors,
    state: SessionState,
}

impl<'a> AccountSession<'a> {
    pub fn new(
        account: &'a Account,
        settings: &'a SessionSettings,
        selectors: &'a ProfileSelectors,
    ) -> Self {
        Self {
            account,
            settings,
            selectors,
            state: SessionState::Navigating,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn enter(&mut self, state: SessionState) {
        debug!(account = self.account.handle(), from = %self.state, to = %state, "Session state");
        self.state = state;
    }

    fn fail(&mut self, error: AccountError) -> AccountError {
        self.enter(SessionState::Failed);
        error
    }

    /// Drive the visit to `Done` or `Failed`.
    pub async fn run(
        &mut self,
        browser: &mut dyn BrowserSession,
    ) -> Result<AccountOutcome, AccountError> {
        let url = self.account.profile_url();
        info!(account = self.account.handle(), url = url.as_str(), "Visiting account");

        self.enter(SessionState::Navigating);
        if let Err(e) = browser.goto(&url, self.settings.navigation_timeout).await {
            let err = match e {
                SessionError::NavigationTimeout { .. } => AccountError::NavigationTimeout(e),
                other => AccountError::Session {
                    state: SessionState::Navigating,
                    source: other,
                },
            };
            return Err(self.fail(err));
        }

        self.enter(SessionState::AwaitingReady);
        if let Err(e) = browser
            .wait_for_selector(POST_LIST_SELECTOR, self.settings.ready_timeout)
            .await
        {
            let err = match e {
                SessionError::ReadinessTimeout { .. } => AccountError::ReadinessTimeout(e),
                other => AccountError::Session {
                    state: SessionState::AwaitingReady,
                    source: other,
                },
            };
            return Err(self.fail(err));
        }

        let html = match browser.content() {
            Some(html) => html.to_string(),
            None => {
                let err = AccountError::Session {
                    state: SessionState::AwaitingReady,
                    source: SessionError::NoDocument,
                };
                return Err(self.fail(err));
            }
        };

        Ok(self.inspect(&html))
    }

    /// Everything after the page is ready. Synchronous: the parsed document
    /// never lives across an await.
    pub fn inspect(&mut self, html: &str) -> AccountOutcome {
        let handle = self.account.handle();
        let document = Html::parse_document(html);
        let page = ProfilePage::new(&document, self.selectors);

        self.enter(SessionState::ValidatingIdentity);
        let nickname = page.nickname();
        if nickname.is_none() {
            warn!(account = handle, "Nickname element not found");
        }
        let displayed_handle = page.displayed_handle();
        let identity_verified = match displayed_handle.as_deref() {
            Some(displayed) if self.account.matches_displayed(displayed) => true,
            Some(displayed) => {
                warn!(
                    account = handle,
                    displayed,
                    "Displayed handle does not match the requested account; page may have redirected"
                );
                false
            }
            None => {
                warn!(account = handle, "Handle element not found, cannot verify identity");
                false
            }
        };

        self.enter(SessionState::Collecting);
        let (found, cards) = page.post_cards(self.settings.post_limit);
        if cards.is_empty() {
            warn!(account = handle, "No posts found on profile");
            self.enter(SessionState::Done);
            return AccountOutcome::NoPosts;
        }
        info!(account = handle, found, processing = cards.len(), "Collected post cards");

        self.enter(SessionState::Extracting);
        let posts: Vec<_> = cards
            .iter()
            .enumerate()
            .map(|(i, card)| extract_post(card, i + 1))
            .collect();

        self.enter(SessionState::Resolving);
        let last_update_time = resolve_last_update(&posts);

        self.enter(SessionState::Done);
        AccountOutcome::Captured(AccountSnapshot {
            account: self.account.clone(),
            nickname,
            displayed_handle,
            identity_verified,
            last_update_time,
            posts,
            captured_at: Local::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> ProfileSelectors {
        ProfileSelectors::new().unwrap()
    }

    #[test]
    fn retryable_classification() {
        let nav = AccountError::NavigationTimeout(SessionError::NavigationTimeout {
            url: "u".into(),
            timeout: Duration::from_secs(1),
        });
        assert!(nav.is_retryable());
        assert_eq!(nav.kind(), FailureKind::NavigationTimeout);

        let budget = AccountError::BudgetExceeded {
            budget: Duration::from_secs(1),
        };
        assert!(budget.is_retryable());

        let other = AccountError::Session {
            state: SessionState::Navigating,
            source: SessionError::Browser("crashed".into()),
        };
        assert!(!other.is_retryable());
        assert_eq!(other.kind(), FailureKind::Session);
        assert!(other.to_string().starts_with("navigating failed"));
    }

    #[test]
    fn empty_grid_is_no_posts() {
        let account = Account::parse("tiktok").unwrap();
        let settings = SessionSettings::default();
        let selectors = selectors();
        let mut session = AccountSession::new(&account, &settings, &selectors);

        let outcome = session.inspect(
            r#"<h1 data-e2e="user-title">tiktok</h1><div data-e2e="user-post-item-list"></div>"#,
        );

        assert!(matches!(outcome, AccountOutcome::NoPosts));
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn missing_handle_element_is_unverified() {
        let account = Account::parse("tiktok").unwrap();
        let settings = SessionSettings::default();
        let selectors = selectors();
        let mut session = AccountSession::new(&account, &settings, &selectors);

        let outcome = session.inspect(
            r#"<div data-e2e="user-post-item-list">
                 <div data-e2e="user-post-item"><a href="https://www.tiktok.com/@tiktok/video/7301234567890123456"></a></div>
               </div>"#,
        );

        match outcome {
            AccountOutcome::Captured(snapshot) => {
                assert!(!snapshot.identity_verified);
                assert!(snapshot.displayed_handle.is_none());
                assert!(snapshot.nickname.is_none());
                assert_eq!(snapshot.posts.len(), 1);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn post_limit_caps_extraction() {
        let account = Account::parse("tiktok").unwrap();
        let settings = SessionSettings {
            post_limit: 2,
            ..Default::default()
        };
        let selectors = selectors();
        let mut session = AccountSession::new(&account, &settings, &selectors);

        let cards: String = (1..=5)
            .map(|i| format!(r#"<div data-e2e="user-post-item"><a href="/@tiktok/video/{i}"></a></div>"#))
            .collect();
        let outcome = session.inspect(&format!(
            r#"<h1 data-e2e="user-title">@tiktok</h1><div data-e2e="user-post-item-list">{cards}</div>"#
        ));

        match outcome {
            AccountOutcome::Captured(snapshot) => {
                assert!(snapshot.identity_verified);
                assert_eq!(snapshot.posts.len(), 2);
                assert_eq!(snapshot.posts[0].video_id, Some(1));
                assert_eq!(snapshot.posts[1].video_id, Some(2));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}
