//! Hidden-content filtering.
//!
//! Exclusion lists are owned by another service; this crate only consumes
//! them as a [`ContentFilter`] obtained per caller and photo source.

use crate::photo::Photo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Where a photo originates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoOrigin {
    /// Third-party imagery provider.
    Upstream,
    /// Photos uploaded directly by users.
    Local,
}

impl PhotoOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for PhotoOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Photos and creators a caller has chosen to hide.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentFilter {
    pub hidden_photo_ids: HashSet<String>,
    pub hidden_creator_ids: HashSet<String>,
}

impl ContentFilter {
    pub fn is_empty(&self) -> bool {
        self.hidden_photo_ids.is_empty() && self.hidden_creator_ids.is_empty()
    }

    /// Whether the photo passes the filter.
    pub fn allows(&self, photo: &Photo) -> bool {
        if self.hidden_photo_ids.contains(&photo.id) {
            return false;
        }
        match photo.creator_id() {
            Some(creator) => !self.hidden_creator_ids.contains(creator),
            None => true,
        }
    }

    /// Drop every photo the filter rejects.
    pub fn apply(&self, photos: &mut Vec<Photo>) {
        if !self.is_empty() {
            photos.retain(|p| self.allows(p));
        }
    }
}

/// Source of per-caller exclusion lists.
#[async_trait]
pub trait HiddenContentSource: Send + Sync {
    /// Filter to apply for `caller` when serving photos from `origin`.
    async fn filter_for(&self, caller: Option<&str>, origin: PhotoOrigin) -> ContentFilter;
}

/// Hides nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHiddenContent;

#[async_trait]
impl HiddenContentSource for NoHiddenContent {
    async fn filter_for(&self, _caller: Option<&str>, _origin: PhotoOrigin) -> ContentFilter {
        ContentFilter::default()
    }
}

/// In-memory exclusion lists keyed by caller and origin.
#[derive(Debug, Default)]
pub struct StaticHiddenContent {
    filters: RwLock<HashMap<(String, PhotoOrigin), ContentFilter>>,
}

impl StaticHiddenContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide_photo(&self, caller: &str, origin: PhotoOrigin, photo_id: &str) {
        let mut filters = self.filters.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Hidden content lock poisoned, recovering");
            poisoned.into_inner()
        });
        filters
            .entry((caller.to_string(), origin))
            .or_default()
            .hidden_photo_ids
            .insert(photo_id.to_string());
    }

    pub fn hide_creator(&self, caller: &str, origin: PhotoOrigin, creator_id: &str) {
        let mut filters = self.filters.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Hidden content lock poisoned, recovering");
            poisoned.into_inner()
        });
        filters
            .entry((caller.to_string(), origin))
            .or_default()
            .hidden_creator_ids
            .insert(creator_id.to_string());
    }
}

#[async_trait]
impl HiddenContentSource for StaticHiddenContent {
    async fn filter_for(&self, caller: Option<&str>, origin: PhotoOrigin) -> ContentFilter {
        let Some(caller) = caller else {
            return ContentFilter::default();
        };
        let filters = self.filters.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Hidden content lock poisoned, recovering");
            poisoned.into_inner()
        });
        filters
            .get(&(caller.to_string(), origin))
            .cloned()
            .unwrap_or_default()
    }
}
