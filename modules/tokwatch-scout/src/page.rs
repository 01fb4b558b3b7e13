// DOM queries against a rendered profile page.

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

/// Rendered once the post grid exists; the readiness marker for a profile.
pub const POST_LIST_SELECTOR: &str = r#"[data-e2e="user-post-item-list"]"#;
pub const POST_ITEM_SELECTOR: &str = r#"[data-e2e="user-post-item"]"#;
pub const PINNED_BADGE_SELECTOR: &str = r#"[data-e2e="video-card-pinned"]"#;
pub const VIEWS_SELECTOR: &str = r#"[data-e2e="video-views"]"#;
pub const POST_LINK_SELECTOR: &str = "a";
pub const HANDLE_SELECTOR: &str = r#"[data-e2e="user-title"]"#;
pub const NICKNAME_SELECTOR: &str = r#"[data-e2e="user-subtitle"]"#;

/// Pre-parsed selectors for every element the scout reads.
#[derive(Debug, Clone)]
pub struct ProfileSelectors {
    pub(crate) post_item: Selector,
    pub(crate) pinned_badge: Selector,
    pub(crate) views: Selector,
    pub(crate) post_link: Selector,
    pub(crate) handle: Selector,
    pub(crate) nickname: Selector,
}

impl ProfileSelectors {
    pub fn new() -> Result<Self> {
        Ok(Self {
            post_item: parse(POST_ITEM_SELECTOR)?,
            pinned_badge: parse(PINNED_BADGE_SELECTOR)?,
            views: parse(VIEWS_SELECTOR)?,
            post_link: parse(POST_LINK_SELECTOR)?,
            handle: parse(HANDLE_SELECTOR)?,
            nickname: parse(NICKNAME_SELECTOR)?,
        })
    }
}

fn parse(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector {selector}: {e}"))
}

/// Visible text of an element, trimmed. `None` when there is none.
pub(crate) fn inner_text(element: ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<String>();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// A parsed profile page.
pub struct ProfilePage<'a> {
    document: &'a Html,
    selectors: &'a ProfileSelectors,
}

/// One post card in the profile grid.
pub struct PostCard<'a> {
    pub(crate) element: ElementRef<'a>,
    pub(crate) selectors: &'a ProfileSelectors,
}

impl<'a> ProfilePage<'a> {
    pub fn new(document: &'a Html, selectors: &'a ProfileSelectors) -> Self {
        Self { document, selectors }
    }

    /// Display name shown under the handle.
    pub fn nickname(&self) -> Option<String> {
        self.document
            .select(&self.selectors.nickname)
            .next()
            .and_then(inner_text)
    }

    /// Handle as the page itself renders it.
    pub fn displayed_handle(&self) -> Option<String> {
        self.document
            .select(&self.selectors.handle)
            .next()
            .and_then(inner_text)
    }

    /// Post cards in display order. Returns the total found alongside the
    /// first `limit` cards.
    pub fn post_cards(&self, limit: usize) -> (usize, Vec<PostCard<'a>>) {
        let all: Vec<ElementRef<'a>> = self.document.select(&self.selectors.post_item).collect();
        let found = all.len();
        let cards = all
            .into_iter()
            .take(limit)
            .map(|element| PostCard {
                element,
                selectors: self.selectors,
            })
            .collect();
        (found, cards)
    }
}
