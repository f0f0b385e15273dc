//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;
use viewfinder_core::{BoundingBox, Creator, Geometry, Photo, RegionCoverage};

// =============================================================================
// Regions
// =============================================================================

/// A rectangle the system has started or finished fetching from upstream.
///
/// The bounds never change after insertion and `is_complete` only moves from
/// false to true.
#[derive(Debug, Clone, FromRow)]
pub struct RegionRow {
    pub region_id: Uuid,
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
    pub is_complete: bool,
    /// Whether the last page seen had a continuation cursor.
    pub has_more: bool,
    pub photo_count: i64,
    /// How many times this region was requested (created or re-found).
    pub total_requests: i64,
    pub last_cursor: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_updated: OffsetDateTime,
}

impl RegionRow {
    /// A fresh, incomplete region for `bbox`.
    pub fn new(bbox: &BoundingBox, now: OffsetDateTime) -> Self {
        Self {
            region_id: Uuid::new_v4(),
            min_lat: bbox.min_lat(),
            min_lon: bbox.min_lon(),
            max_lat: bbox.max_lat(),
            max_lon: bbox.max_lon(),
            is_complete: false,
            has_more: true,
            photo_count: 0,
            total_requests: 1,
            last_cursor: None,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn bbox(&self) -> MetadataResult<BoundingBox> {
        BoundingBox::new(self.min_lat, self.min_lon, self.max_lat, self.max_lon).map_err(|e| {
            MetadataError::Internal(format!(
                "region {} has invalid stored bounds: {e}",
                self.region_id
            ))
        })
    }

    pub fn coverage(&self) -> MetadataResult<RegionCoverage> {
        Ok(RegionCoverage {
            bbox: self.bbox()?,
            is_complete: self.is_complete,
        })
    }
}

// =============================================================================
// Photos
// =============================================================================

/// A cached photo. `external_id` is the upstream identifier and is unique
/// across the whole store.
#[derive(Debug, Clone, FromRow)]
pub struct PhotoRow {
    pub external_id: String,
    pub lat: f64,
    pub lon: f64,
    pub compass_angle: Option<f64>,
    pub computed_compass_angle: Option<f64>,
    pub computed_rotation: Option<f64>,
    pub computed_altitude: Option<f64>,
    pub captured_at: Option<OffsetDateTime>,
    pub is_pano: bool,
    pub thumb_url: Option<String>,
    pub creator_id: Option<String>,
    pub creator_username: Option<String>,
    /// Region that was being populated when the photo was first stored.
    pub region_id: Uuid,
    /// Upstream payload as received, JSON text.
    pub raw_data: Option<String>,
    pub cached_at: OffsetDateTime,
}

impl PhotoRow {
    pub fn from_photo(
        photo: &Photo,
        region_id: Uuid,
        raw_data: Option<String>,
        cached_at: OffsetDateTime,
    ) -> Self {
        Self {
            external_id: photo.id.clone(),
            lat: photo.lat(),
            lon: photo.lon(),
            compass_angle: photo.compass_angle,
            computed_compass_angle: photo.computed_compass_angle,
            computed_rotation: photo.computed_rotation,
            computed_altitude: photo.computed_altitude,
            captured_at: photo.captured_at,
            is_pano: photo.is_pano,
            thumb_url: photo.thumb_url.clone(),
            creator_id: photo.creator.as_ref().map(|c| c.id.clone()),
            creator_username: photo.creator.as_ref().and_then(|c| c.username.clone()),
            region_id,
            raw_data,
            cached_at,
        }
    }

    pub fn into_photo(self) -> Photo {
        let creator = self.creator_id.map(|id| Creator {
            id,
            username: self.creator_username,
        });
        Photo {
            id: self.external_id,
            geometry: Geometry::Point {
                coordinates: [self.lon, self.lat],
            },
            compass_angle: self.compass_angle,
            computed_compass_angle: self.computed_compass_angle,
            computed_rotation: self.computed_rotation,
            computed_altitude: self.computed_altitude,
            captured_at: self.captured_at,
            is_pano: self.is_pano,
            thumb_url: self.thumb_url,
            creator,
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Point-in-time counters for the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_photos: u64,
    pub total_regions: u64,
    pub complete_regions: u64,
}

impl CacheStats {
    /// Percentage of regions that are complete; 0 when there are none.
    pub fn efficiency(&self) -> f64 {
        if self.total_regions == 0 {
            0.0
        } else {
            self.complete_regions as f64 / self.total_regions as f64 * 100.0
        }
    }
}
