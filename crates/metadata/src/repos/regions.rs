//! Region repository trait.

use crate::error::MetadataResult;
use crate::models::RegionRow;
use async_trait::async_trait;
use uuid::Uuid;
use viewfinder_core::BoundingBox;

/// Repository for region coverage records.
#[async_trait]
pub trait RegionRepo: Send + Sync {
    /// All regions whose rectangle shares at least one point with
    /// `viewport`, complete or not.
    async fn find_intersecting_regions(&self, viewport: &BoundingBox)
    -> MetadataResult<Vec<RegionRow>>;

    /// Return the region with exactly these bounds, creating it if needed.
    ///
    /// An existing region has its `total_requests` incremented. When two
    /// callers race to create the same rectangle, both receive the row that
    /// won the unique index.
    async fn create_region_if_absent(&self, bbox: &BoundingBox) -> MetadataResult<RegionRow>;

    /// Get a region by ID.
    async fn get_region(&self, region_id: Uuid) -> MetadataResult<Option<RegionRow>>;

    /// Mark a region complete and store its final cursor.
    /// A `None` cursor keeps the previously stored one.
    async fn mark_region_complete(
        &self,
        region_id: Uuid,
        last_cursor: Option<&str>,
    ) -> MetadataResult<()>;

    /// Record pagination progress. Complete regions are left untouched.
    async fn update_region_cursor(&self, region_id: Uuid, cursor: Option<&str>)
    -> MetadataResult<()>;

    /// Delete a region and every photo attributed to it.
    /// Returns the number of photos removed.
    async fn invalidate_region(&self, region_id: Uuid) -> MetadataResult<u64>;
}
