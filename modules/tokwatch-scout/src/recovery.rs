// Recovery from likely bot challenges: bounded retry with backoff, plus an
// optional operator hook that runs only once retries are exhausted.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokwatch_common::Account;
use tracing::{info, warn};

use crate::account::AccountError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per account, including the first.
    pub max_attempts: u32,
    /// Backoff before retry n (0-based) is base * 3^n + jitter.
    pub base_backoff: Duration,
    /// Upper bound of the random jitter added to each backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(3),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let base = self.base_backoff.saturating_mul(3u32.pow(exponent));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        base + jitter
    }

    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Hook invoked after an account exhausted its retries on a likely block.
/// Runs outside the retry loop; the run continues once it returns.
#[async_trait]
pub trait ManualOverride: Send + Sync {
    async fn on_blocked(&self, account: &Account, error: &AccountError);
}

/// Pauses the run until the operator presses Enter, so the browser state
/// can be inspected (captcha, login wall) before moving on.
pub struct OperatorPrompt;

#[async_trait]
impl ManualOverride for OperatorPrompt {
    async fn on_blocked(&self, account: &Account, error: &AccountError) {
        let message = format!(
            "\n[tokwatch] @{account} looks blocked ({error}).\n\
             Check for a verification challenge or login wall, then press Enter to continue...\n"
        );
        let mut stdin = BufReader::new(tokio::io::stdin());
        if prompt_operator(&mut tokio::io::stderr(), &mut stdin, &message).await {
            info!(account = account.handle(), "Operator acknowledged, continuing");
        }
    }
}

/// Show `message` and wait for one line of input. False when the prompt
/// could not be shown or the answer could not be read; nothing is read
/// unless the prompt was fully flushed.
async fn prompt_operator<W, R>(out: &mut W, input: &mut R, message: &str) -> bool
where
    W: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    if let Err(e) = out.write_all(message.as_bytes()).await {
        warn!(error = %e, "Could not prompt operator");
        return false;
    }
    if let Err(e) = out.flush().await {
        warn!(error = %e, "Could not prompt operator");
        return false;
    }

    let mut line = String::new();
    match input.read_line(&mut line).await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Could not read operator acknowledgement");
            false
        }
    }
}
