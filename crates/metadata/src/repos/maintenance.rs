//! Store-wide statistics and administrative operations.

use crate::error::MetadataResult;
use crate::models::CacheStats;
use async_trait::async_trait;

/// Repository for store-wide operations.
#[async_trait]
pub trait MaintenanceRepo: Send + Sync {
    /// Current photo and region counts.
    async fn stats_snapshot(&self) -> MetadataResult<CacheStats>;

    /// Delete every region and photo.
    async fn reset(&self) -> MetadataResult<()>;
}
