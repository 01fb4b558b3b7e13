//! Creation time embedded in short-video post identifiers.
//!
//! Post ids are 64-bit snowflakes whose upper 32 bits hold the Unix
//! timestamp (seconds) of creation. The lower bits are sequence/shard data
//! and carry no time information.

use chrono::{DateTime, Local, TimeZone};

/// Path segment that precedes the numeric id in a post URL.
pub const POST_PATH_MARKER: &str = "/video/";

/// Decode the creation instant of a post id, in local time.
pub fn decode(id: u64) -> Option<DateTime<Local>> {
    let seconds = (id >> 32) as i64;
    Local.timestamp_opt(seconds, 0).single()
}

/// Parse a textual post id and decode it. Empty, negative, or non-numeric
/// input yields `None`.
pub fn decode_str(raw: &str) -> Option<DateTime<Local>> {
    parse_id(raw).and_then(decode)
}

/// Parse a textual post id as an unsigned 64-bit integer.
pub fn parse_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    // u64::from_str accepts a leading '+'; ids never carry a sign.
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Pull the post id out of a post URL: the segment after the last
/// `/video/`, with any query string or fragment removed.
pub fn video_id_from_url(url: &str) -> Option<u64> {
    let (_, tail) = url.rsplit_once(POST_PATH_MARKER)?;
    let segment = tail.split(['?', '#']).next().unwrap_or_default();
    parse_id(segment)
}
