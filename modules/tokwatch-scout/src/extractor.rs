// Post card → PostRecord.
//
// Each field is read independently and reported as a `FieldResult`; a field
// that cannot be read becomes a recorded miss and never stops the others.

use tokwatch_common::snowflake;
use tokwatch_common::{FieldMiss, FieldResult, PostField, PostRecord};
use tracing::{debug, warn};
use url::Url;

use crate::page::{inner_text, PostCard};

/// Origin used to absolutize relative post links.
const SITE_ORIGIN: &str = "https://www.tiktok.com/";

/// The reads the extractor needs from one post card.
pub trait PostHandle {
    /// Whether the card carries the pinned badge.
    fn pinned_marker(&self) -> FieldResult<bool>;

    /// Absolute URL of the post.
    fn link_href(&self) -> FieldResult<String>;

    /// View-count text as displayed (e.g. "1.2M").
    fn views_text(&self) -> FieldResult<String>;
}

impl PostHandle for PostCard<'_> {
    fn pinned_marker(&self) -> FieldResult<bool> {
        Ok(self.element.select(&self.selectors.pinned_badge).next().is_some())
    }

    fn link_href(&self) -> FieldResult<String> {
        let anchor = self
            .element
            .select(&self.selectors.post_link)
            .next()
            .ok_or_else(|| FieldMiss::new(PostField::Url, "no link in post card"))?;
        let href = anchor
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FieldMiss::new(PostField::Url, "link has no href"))?;
        absolutize(href)
    }

    fn views_text(&self) -> FieldResult<String> {
        let element = self
            .element
            .select(&self.selectors.views)
            .next()
            .ok_or_else(|| FieldMiss::new(PostField::Views, "no view counter in post card"))?;
        inner_text(element)
            .ok_or_else(|| FieldMiss::new(PostField::Views, "view counter is empty"))
    }
}

fn absolutize(href: &str) -> FieldResult<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Ok(href.to_string());
    }
    Url::parse(SITE_ORIGIN)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .map_err(|e| FieldMiss::new(PostField::Url, format!("unresolvable href {href:?}: {e}")))
}

/// Build a record from one post card, best-effort, field by field.
/// `position` is 1-based and only used for logging.
pub fn extract_post<H: PostHandle + ?Sized>(handle: &H, position: usize) -> PostRecord {
    let mut record = PostRecord::default();

    match handle.pinned_marker() {
        Ok(pinned) => record.is_pinned = pinned,
        Err(miss) => note_miss(&mut record, miss, position),
    }

    match handle.link_href() {
        Ok(href) => {
            match snowflake::video_id_from_url(&href) {
                Some(id) => {
                    record.video_id = Some(id);
                    match snowflake::decode(id) {
                        Some(time) => record.publish_time = Some(time),
                        None => note_derived_miss(
                            &mut record,
                            FieldMiss::new(PostField::PublishTime, "id does not decode to a time"),
                            position,
                        ),
                    }
                }
                None => {
                    note_derived_miss(
                        &mut record,
                        FieldMiss::new(PostField::VideoId, format!("no numeric id in {href}")),
                        position,
                    );
                    note_derived_miss(
                        &mut record,
                        FieldMiss::new(PostField::PublishTime, "no video id"),
                        position,
                    );
                }
            }
            record.url = Some(href);
        }
        Err(miss) => {
            note_miss(&mut record, miss, position);
            note_derived_miss(
                &mut record,
                FieldMiss::new(PostField::VideoId, "no post link"),
                position,
            );
            note_derived_miss(
                &mut record,
                FieldMiss::new(PostField::PublishTime, "no post link"),
                position,
            );
        }
    }

    match handle.views_text() {
        Ok(views) => record.views = Some(views),
        Err(miss) => note_miss(&mut record, miss, position),
    }

    record
}

fn note_miss(record: &mut PostRecord, miss: FieldMiss, position: usize) {
    warn!(post = position, field = %miss.field, reason = miss.reason.as_str(), "Post field unavailable");
    record.misses.push(miss);
}

fn note_derived_miss(record: &mut PostRecord, miss: FieldMiss, position: usize) {
    debug!(post = position, field = %miss.field, reason = miss.reason.as_str(), "Post field unavailable");
    record.misses.push(miss);
}
