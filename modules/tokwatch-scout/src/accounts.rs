// Account list: one handle per line, blank lines ignored.

use std::path::{Path, PathBuf};

use tokwatch_common::Account;
use tracing::{info, warn};

/// Written to a missing account list so the operator has something to edit.
pub const SAMPLE_ACCOUNTS: &[&str] = &["tiktok", "budgebuys"];

#[derive(Debug, thiserror::Error)]
pub enum AccountListError {
    #[error("account list {path} not found; a sample list was created there, fill it in and run again")]
    Missing { path: PathBuf },

    #[error("account list {path} contains no accounts")]
    Empty { path: PathBuf },

    #[error("failed to access account list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse account list text. Invalid handles are skipped with a warning.
pub fn parse_accounts(text: &str) -> Vec<Account> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match Account::parse(line) {
            Ok(account) => Some(account),
            Err(e) => {
                warn!(error = %e, "Skipping account list entry");
                None
            }
        })
        .collect()
}

/// Read the account list. A missing file is replaced by a sample list and
/// reported as `Missing`, never treated as empty input.
pub async fn load_accounts(path: &Path) -> Result<Vec<Account>, AccountListError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let sample: String = SAMPLE_ACCOUNTS.iter().map(|a| format!("{a}\n")).collect();
            tokio::fs::write(path, sample)
                .await
                .map_err(|source| AccountListError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            return Err(AccountListError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(AccountListError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let accounts = parse_accounts(&text);
    if accounts.is_empty() {
        return Err(AccountListError::Empty {
            path: path.to_path_buf(),
        });
    }

    info!(count = accounts.len(), path = %path.display(), "Loaded account list");
    Ok(accounts)
}
