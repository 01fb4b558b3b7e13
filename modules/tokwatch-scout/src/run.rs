// Run controller: visits each account in list order with one browser
// session, retries likely blocks, persists snapshots, and never lets one
// account's failure end the run.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use tokwatch_common::{Account, AccountSnapshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::account::{
    AccountError, AccountOutcome, AccountSession, FailureKind, SessionSettings, SessionState,
};
use crate::browser::BrowserSession;
use crate::page::ProfileSelectors;
use crate::recovery::{ManualOverride, RetryPolicy};
use crate::writer::SnapshotWriter;

/// What happened to one account in this run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountStatus {
    Written {
        path: PathBuf,
        identity_verified: bool,
        displayed_handle: Option<String>,
        posts: usize,
        last_update_time: Option<DateTime<Local>>,
    },
    NoPosts,
    Failed {
        kind: FailureKind,
        attempts: u32,
        message: String,
    },
    WriteFailed {
        message: String,
    },
    /// Not visited because shutdown was requested first.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: Account,
    #[serde(flatten)]
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub accounts: Vec<AccountReport>,
}

impl RunReport {
    pub fn written(&self) -> usize {
        self.count(|s| matches!(s, AccountStatus::Written { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| {
            matches!(
                s,
                AccountStatus::Failed { .. } | AccountStatus::WriteFailed { .. }
            )
        })
    }

    pub fn no_posts(&self) -> usize {
        self.count(|s| matches!(s, AccountStatus::NoPosts))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, AccountStatus::Skipped))
    }

    /// Accounts whose page showed a different handle than requested.
    pub fn identity_mismatches(&self) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    AccountStatus::Written {
                        identity_verified: false,
                        ..
                    }
                )
            })
            .map(|r| &r.account)
            .collect()
    }

    fn count(&self, pred: impl Fn(&AccountStatus) -> bool) -> usize {
        self.accounts.iter().filter(|r| pred(&r.status)).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accounts: {} written, {} without posts, {} failed, {} skipped, {} unverified",
            self.accounts.len(),
            self.written(),
            self.no_posts(),
            self.failed(),
            self.skipped(),
            self.identity_mismatches().len()
        )
    }
}

pub struct RunController {
    browser: Box<dyn BrowserSession>,
    writer: SnapshotWriter,
    settings: SessionSettings,
    selectors: ProfileSelectors,
    retry: RetryPolicy,
    account_budget: Duration,
    manual_override: Option<Box<dyn ManualOverride>>,
    shutdown: watch::Receiver<bool>,
}

impl RunController {
    pub fn new(
        browser: Box<dyn BrowserSession>,
        writer: SnapshotWriter,
        settings: SessionSettings,
        retry: RetryPolicy,
        account_budget: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            browser,
            writer,
            settings,
            selectors: ProfileSelectors::new()?,
            retry,
            account_budget,
            manual_override: None,
            shutdown,
        })
    }

    pub fn with_manual_override(mut self, hook: Box<dyn ManualOverride>) -> Self {
        self.manual_override = Some(hook);
        self
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Visit every account in order. Always returns a report; per-account
    /// failures are recorded in it.
    pub async fn run(&mut self, accounts: &[Account]) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        info!(%run_id, accounts = accounts.len(), "Run started");

        let mut reports = Vec::with_capacity(accounts.len());
        for (i, account) in accounts.iter().enumerate() {
            if self.shutdown_requested() {
                warn!(remaining = accounts.len() - i, "Shutdown requested, skipping remaining accounts");
                reports.extend(accounts[i..].iter().map(|a| AccountReport {
                    account: a.clone(),
                    status: AccountStatus::Skipped,
                }));
                break;
            }

            info!(account = account.handle(), position = i + 1, total = accounts.len(), "Monitoring account");
            let status = self.visit(account).await;
            reports.push(AccountReport {
                account: account.clone(),
                status,
            });
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Local::now(),
            accounts: reports,
        };
        info!(%run_id, "Run complete. {report}");
        report
    }

    /// One account, including retries. Never fails.
    async fn visit(&mut self, account: &Account) -> AccountStatus {
        let mut attempt = 0;
        loop {
            attempt += 1;

            if let Err(e) = self.browser.reset().await {
                let err = AccountError::Session {
                    state: SessionState::Navigating,
                    source: e,
                };
                error!(account = account.handle(), error = %err, "Browser reset failed, not reusing the session");
                return failed(&err, attempt);
            }

            let result = {
                let mut session = AccountSession::new(account, &self.settings, &self.selectors);
                match tokio::time::timeout(self.account_budget, session.run(self.browser.as_mut()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AccountError::BudgetExceeded {
                        budget: self.account_budget,
                    }),
                }
            };

            let err = match result {
                Ok(AccountOutcome::Captured(snapshot)) => return self.persist(snapshot).await,
                Ok(AccountOutcome::NoPosts) => return AccountStatus::NoPosts,
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!(
                    account = account.handle(),
                    kind = ?err.kind(),
                    attempts = attempt,
                    error = %err,
                    "Account failed"
                );
                return failed(&err, attempt);
            }

            if self.retry.allows_retry(attempt) {
                let delay = self.retry.backoff(attempt);
                warn!(
                    account = account.handle(),
                    kind = ?err.kind(),
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Page likely blocked or slow, retrying after backoff"
                );
                if self.sleep_unless_shutdown(delay).await {
                    warn!(account = account.handle(), "Shutdown requested during backoff");
                    return failed(&err, attempt);
                }
                continue;
            }

            error!(
                account = account.handle(),
                kind = ?err.kind(),
                attempts = attempt,
                error = %err,
                "Account blocked, retries exhausted; manual inspection may be needed"
            );
            if self.shutdown_requested() {
                warn!(account = account.handle(), "Shutdown requested, not waiting for the operator");
                return failed(&err, attempt);
            }
            if let Some(hook) = &self.manual_override {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    _ = hook.on_blocked(account, &err) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        warn!(account = account.handle(), "Shutdown requested while waiting for the operator");
                    }
                }
            }
            return failed(&err, attempt);
        }
    }

    async fn persist(&self, snapshot: AccountSnapshot) -> AccountStatus {
        match self.writer.write(&snapshot).await {
            Ok(path) => AccountStatus::Written {
                path,
                identity_verified: snapshot.identity_verified,
                displayed_handle: snapshot.displayed_handle,
                posts: snapshot.posts.len(),
                last_update_time: snapshot.last_update_time,
            },
            Err(e) => {
                error!(account = snapshot.account.handle(), error = %e, "Snapshot write failed");
                AccountStatus::WriteFailed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Sleep for `delay`; returns true if shutdown was requested meanwhile.
    async fn sleep_unless_shutdown(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can request shutdown anymore.
                        (&mut sleep).await;
                        return false;
                    }
                    if *self.shutdown.borrow() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn failed(err: &AccountError, attempts: u32) -> AccountStatus {
    AccountStatus::Failed {
        kind: err.kind(),
        attempts,
        message: err.to_string(),
    }
}
