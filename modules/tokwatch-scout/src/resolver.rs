use chrono::{DateTime, Local};
use tokwatch_common::PostRecord;

/// Resolve an account's last-update time from its posts in display order.
///
/// Pinned posts sit at the top regardless of age, so the first unpinned
/// post with a decoded time wins. If there is none, the first post's time
/// is used even when it is pinned; `None` only when that is missing too.
pub fn resolve_last_update(posts: &[PostRecord]) -> Option<DateTime<Local>> {
    posts
        .iter()
        .find(|p| !p.is_pinned && p.publish_time.is_some())
        .and_then(|p| p.publish_time)
        .or_else(|| posts.first().and_then(|p| p.publish_time))
}
