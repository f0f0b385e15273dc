//! Photo source trait definitions.

use async_trait::async_trait;
use viewfinder_core::{BoundingBox, Photo};

/// A photo decoded from an upstream page together with the item it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedPhoto {
    pub photo: Photo,
    /// The upstream item as received, stored alongside the cached row.
    pub raw: serde_json::Value,
}

/// Pagination state reported with a page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Paging {
    /// Whether the upstream advertised a next page.
    pub has_next: bool,
    /// Cursor to pass as `after` for the next page.
    pub after: Option<String>,
}

impl Paging {
    /// The cursor for the next page, if there is one to fetch.
    pub fn next_cursor(&self) -> Option<&str> {
        if self.has_next {
            self.after.as_deref()
        } else {
            None
        }
    }
}

/// How a page fetch ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchOutcome {
    #[default]
    Ok,
    /// The request failed or the body could not be decoded; the page is empty.
    Failed,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Ok => "ok",
            FetchOutcome::Failed => "failed",
        }
    }
}

/// One page of upstream results.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub data: Vec<FetchedPhoto>,
    /// Items the upstream sent, including ones that failed to decode.
    pub received: usize,
    pub paging: Paging,
    pub outcome: FetchOutcome,
}

impl Page {
    /// The page returned when a fetch fails: no photos and no next page.
    pub fn failed() -> Self {
        Self {
            data: Vec::new(),
            received: 0,
            paging: Paging::default(),
            outcome: FetchOutcome::Failed,
        }
    }

    /// No photos decoded from this page.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The upstream sent no items at all, so there is nothing left to page.
    ///
    /// A page whose items all failed to decode is not exhausted; its cursor
    /// still leads to more data.
    pub fn is_exhausted(&self) -> bool {
        self.received == 0
    }
}

/// Source of photos for a rectangle, one page at a time.
#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// Fetch one page of photos inside `bbox`, continuing after `cursor`.
    ///
    /// Makes exactly one attempt. Failures are logged and yield
    /// [`Page::failed`] instead of an error.
    async fn fetch_page(&self, bbox: &BoundingBox, cursor: Option<&str>) -> Page;
}
