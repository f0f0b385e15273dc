//! Photo repository trait.

use crate::error::MetadataResult;
use crate::models::PhotoRow;
use async_trait::async_trait;
use uuid::Uuid;
use viewfinder_core::{BoundingBox, ContentFilter};

/// Maximum bind parameters per `IN (...)` lookup.
pub const ID_LOOKUP_CHUNK: usize = 500;

/// Repository for cached photos.
#[async_trait]
pub trait PhotoRepo: Send + Sync {
    /// Insert photos attributed to `region_id`, skipping ids already stored.
    ///
    /// Returns the number of rows actually inserted; the region's
    /// `photo_count` grows by the same amount in the same transaction.
    async fn insert_photo_batch(&self, region_id: Uuid, photos: &[PhotoRow])
    -> MetadataResult<u64>;

    /// Every cached photo inside `viewport` (edges included) that passes
    /// `filter`, ordered by id.
    async fn find_photos_in_viewport(
        &self,
        viewport: &BoundingBox,
        filter: &ContentFilter,
    ) -> MetadataResult<Vec<PhotoRow>>;

    /// Get a photo by its upstream id.
    async fn get_photo(&self, external_id: &str) -> MetadataResult<Option<PhotoRow>>;
}
