use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::TokwatchError;

/// Placeholder written for any field that could not be read.
pub const NOT_AVAILABLE: &str = "N/A";
/// Placeholder written when no last-update time could be resolved.
pub const UNKNOWN_UPDATE: &str = "未知";
/// Layout used for every human-readable instant in a snapshot record.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const PROFILE_BASE_URL: &str = "https://www.tiktok.com/@";

// --- Accounts ---

/// A monitored account handle, without the leading `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    /// Normalize a handle from the account list. A leading `@` is dropped;
    /// anything that could escape the per-account log directory is rejected.
    pub fn parse(raw: &str) -> Result<Self, TokwatchError> {
        let handle = raw.trim();
        let handle = handle.strip_prefix('@').unwrap_or(handle);

        let reason = if handle.is_empty() {
            Some("empty handle")
        } else if handle.contains(['/', '\\']) || handle.contains("..") {
            Some("contains a path separator")
        } else if handle.chars().any(char::is_whitespace) {
            Some("contains whitespace")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TokwatchError::InvalidAccount {
                handle: raw.to_string(),
                reason,
            }),
            None => Ok(Self(handle.to_string())),
        }
    }

    pub fn handle(&self) -> &str {
        &self.0
    }

    pub fn profile_url(&self) -> String {
        format!("{PROFILE_BASE_URL}{}", self.0)
    }

    /// Whether the handle shown on the profile page names this account.
    /// The page renders the handle with or without `@` depending on layout.
    pub fn matches_displayed(&self, displayed: &str) -> bool {
        let displayed = displayed.trim();
        displayed.strip_prefix('@').unwrap_or(displayed) == self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Per-field extraction results ---

/// The individually extracted parts of a post card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostField {
    Pinned,
    Url,
    VideoId,
    PublishTime,
    Views,
}

impl fmt::Display for PostField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostField::Pinned => "pinned",
            PostField::Url => "url",
            PostField::VideoId => "video_id",
            PostField::PublishTime => "publish_time",
            PostField::Views => "views",
        };
        f.write_str(name)
    }
}

/// A field that could not be read, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMiss {
    pub field: PostField,
    pub reason: String,
}

impl FieldMiss {
    pub fn new(field: PostField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub type FieldResult<T> = Result<T, FieldMiss>;

// --- Posts and snapshots ---

/// One post card scraped from a profile page.
///
/// `publish_time` is only ever set when `video_id` decoded successfully.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub url: Option<String>,
    pub video_id: Option<u64>,
    pub publish_time: Option<DateTime<Local>>,
    pub views: Option<String>,
    pub is_pinned: bool,
    /// Fields that fell back to their placeholder.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misses: Vec<FieldMiss>,
}

impl PostRecord {
    pub fn is_missing(&self, field: PostField) -> bool {
        self.misses.iter().any(|m| m.field == field)
    }
}

/// The result of one account visit in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account: Account,
    pub nickname: Option<String>,
    /// Handle text the page itself displayed, if any.
    pub displayed_handle: Option<String>,
    pub identity_verified: bool,
    pub last_update_time: Option<DateTime<Local>>,
    pub posts: Vec<PostRecord>,
    pub captured_at: DateTime<Local>,
}

/// Render an optional instant in the record layout, or the given placeholder.
pub fn display_time(time: Option<&DateTime<Local>>, placeholder: &str) -> String {
    time.map(|t| t.format(DISPLAY_TIME_FORMAT).to_string())
        .unwrap_or_else(|| placeholder.to_string())
}
