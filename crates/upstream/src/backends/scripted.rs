//! In-memory photo source for tests and offline development.

use crate::traits::{FetchOutcome, FetchedPhoto, Page, Paging, PhotoSource};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use viewfinder_core::{BoundingBox, Photo};

/// A request observed by a [`ScriptedSource`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub bbox: BoundingBox,
    pub cursor: Option<String>,
}

#[derive(Default)]
struct ScriptedState {
    photos: Vec<Photo>,
    requests: Vec<RecordedRequest>,
    failures_remaining: usize,
    garbled_remaining: usize,
}

/// Serves a fixed photo set, paginated like the real API.
///
/// Each page holds the photos inside the requested rectangle (edges
/// included), ordered by id. The cursor is the offset of the next page.
pub struct ScriptedSource {
    page_size: usize,
    state: Mutex<ScriptedState>,
}

impl ScriptedSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(ScriptedState::default()),
        }
    }

    /// A source with no photos.
    pub fn empty() -> Self {
        Self::new(250)
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Scripted source lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Replace the photo set.
    pub fn set_photos(&self, photos: Vec<Photo>) {
        let mut photos = photos;
        photos.sort_by(|a, b| a.id.cmp(&b.id));
        self.lock().photos = photos;
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    /// Make the next `count` fetches return pages whose items all fail to
    /// decode. Such a page still carries a cursor back to the same offset.
    pub fn garble_next(&self, count: usize) {
        self.lock().garbled_remaining = count;
    }

    /// Every request made so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl PhotoSource for ScriptedSource {
    async fn fetch_page(&self, bbox: &BoundingBox, cursor: Option<&str>) -> Page {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            bbox: *bbox,
            cursor: cursor.map(str::to_string),
        });

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Page::failed();
        }

        let offset = match cursor.map(str::parse::<usize>) {
            None => 0,
            Some(Ok(offset)) => offset,
            Some(Err(_)) => {
                tracing::warn!(cursor = ?cursor, "Scripted source got a foreign cursor");
                return Page::failed();
            }
        };

        if state.garbled_remaining > 0 {
            state.garbled_remaining -= 1;
            return Page {
                data: Vec::new(),
                received: self.page_size,
                paging: Paging {
                    has_next: true,
                    after: Some(offset.to_string()),
                },
                outcome: FetchOutcome::Ok,
            };
        }

        let matching: Vec<&Photo> = state
            .photos
            .iter()
            .filter(|p| bbox.contains_point(p.lat(), p.lon()))
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let data: Vec<FetchedPhoto> = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|photo| FetchedPhoto {
                photo: (*photo).clone(),
                raw: serde_json::to_value(photo).unwrap_or_default(),
            })
            .collect();

        let has_next = end < matching.len();
        Page {
            received: data.len(),
            data,
            paging: Paging {
                has_next,
                after: has_next.then(|| end.to_string()),
            },
            outcome: FetchOutcome::Ok,
        }
    }
}
