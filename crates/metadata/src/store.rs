//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{MaintenanceRepo, PhotoRepo, RegionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: RegionRepo + PhotoRepo + MaintenanceRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, creating the file and schema if needed.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers; concurrent region
            // creation still goes through the unique index path.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs.unwrap_or(60)))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store opened");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::photos::ID_LOOKUP_CHUNK;
    use sqlx::QueryBuilder;
    use std::collections::HashSet;
    use time::OffsetDateTime;
    use uuid::Uuid;
    use viewfinder_core::{BoundingBox, ContentFilter};

    impl SqliteStore {
        /// Bump `total_requests` on the region with exactly these bounds and
        /// return it.
        async fn touch_region_by_bounds(
            &self,
            bbox: &BoundingBox,
        ) -> MetadataResult<Option<RegionRow>> {
            let row = sqlx::query_as::<_, RegionRow>(
                r#"
                UPDATE cached_regions
                SET total_requests = total_requests + 1
                WHERE min_lat = ? AND min_lon = ? AND max_lat = ? AND max_lon = ?
                RETURNING *
                "#,
            )
            .bind(bbox.min_lat())
            .bind(bbox.min_lon())
            .bind(bbox.max_lat())
            .bind(bbox.max_lon())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl RegionRepo for SqliteStore {
        async fn find_intersecting_regions(
            &self,
            viewport: &BoundingBox,
        ) -> MetadataResult<Vec<RegionRow>> {
            let rows = sqlx::query_as::<_, RegionRow>(
                r#"
                SELECT * FROM cached_regions
                WHERE min_lat <= ? AND max_lat >= ? AND min_lon <= ? AND max_lon >= ?
                ORDER BY created_at
                "#,
            )
            .bind(viewport.max_lat())
            .bind(viewport.min_lat())
            .bind(viewport.max_lon())
            .bind(viewport.min_lon())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn create_region_if_absent(&self, bbox: &BoundingBox) -> MetadataResult<RegionRow> {
            if let Some(existing) = self.touch_region_by_bounds(bbox).await? {
                return Ok(existing);
            }

            let region = RegionRow::new(bbox, OffsetDateTime::now_utc());
            let inserted = sqlx::query(
                r#"
                INSERT INTO cached_regions (
                    region_id, min_lat, min_lon, max_lat, max_lon, is_complete, has_more,
                    photo_count, total_requests, last_cursor, created_at, last_updated
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(region.region_id)
            .bind(region.min_lat)
            .bind(region.min_lon)
            .bind(region.max_lat)
            .bind(region.max_lon)
            .bind(region.is_complete)
            .bind(region.has_more)
            .bind(region.photo_count)
            .bind(region.total_requests)
            .bind(&region.last_cursor)
            .bind(region.created_at)
            .bind(region.last_updated)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => {
                    tracing::debug!(region_id = %region.region_id, bbox = %bbox, "Created region");
                    Ok(region)
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    // Lost the race: another request inserted the same bounds.
                    tracing::debug!(bbox = %bbox, "Region created concurrently, re-reading");
                    self.touch_region_by_bounds(bbox).await?.ok_or_else(|| {
                        MetadataError::Internal(format!(
                            "region {bbox} conflicted on insert but could not be re-read"
                        ))
                    })
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_region(&self, region_id: Uuid) -> MetadataResult<Option<RegionRow>> {
            let row =
                sqlx::query_as::<_, RegionRow>("SELECT * FROM cached_regions WHERE region_id = ?")
                    .bind(region_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn mark_region_complete(
            &self,
            region_id: Uuid,
            last_cursor: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE cached_regions
                SET is_complete = ?, has_more = ?, last_cursor = COALESCE(?, last_cursor),
                    last_updated = ?
                WHERE region_id = ?
                "#,
            )
            .bind(true)
            .bind(false)
            .bind(last_cursor)
            .bind(OffsetDateTime::now_utc())
            .bind(region_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("region {region_id}")));
            }
            Ok(())
        }

        async fn update_region_cursor(
            &self,
            region_id: Uuid,
            cursor: Option<&str>,
        ) -> MetadataResult<()> {
            sqlx::query(
                r#"
                UPDATE cached_regions
                SET last_cursor = ?, has_more = ?, last_updated = ?
                WHERE region_id = ? AND is_complete = ?
                "#,
            )
            .bind(cursor)
            .bind(cursor.is_some())
            .bind(OffsetDateTime::now_utc())
            .bind(region_id)
            .bind(false)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn invalidate_region(&self, region_id: Uuid) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;

            let photos = sqlx::query("DELETE FROM cached_photos WHERE region_id = ?")
                .bind(region_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            let regions = sqlx::query("DELETE FROM cached_regions WHERE region_id = ?")
                .bind(region_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if regions == 0 {
                return Err(MetadataError::NotFound(format!("region {region_id}")));
            }

            tx.commit().await?;
            Ok(photos)
        }
    }

    #[async_trait]
    impl PhotoRepo for SqliteStore {
        async fn insert_photo_batch(
            &self,
            region_id: Uuid,
            photos: &[PhotoRow],
        ) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;

            // Skipping known ids avoids most insert attempts; ON CONFLICT
            // below stays the authority.
            let mut known: HashSet<String> = HashSet::new();
            for chunk in photos.chunks(ID_LOOKUP_CHUNK) {
                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT external_id FROM cached_photos WHERE external_id IN (",
                );
                let mut ids = qb.separated(", ");
                for photo in chunk {
                    ids.push_bind(photo.external_id.clone());
                }
                ids.push_unseparated(")");
                let found: Vec<String> = qb.build_query_scalar().fetch_all(&mut *tx).await?;
                known.extend(found);
            }

            let mut inserted = 0u64;
            for photo in photos.iter().filter(|p| !known.contains(&p.external_id)) {
                let result = sqlx::query(
                    r#"
                    INSERT INTO cached_photos (
                        external_id, lat, lon, compass_angle, computed_compass_angle,
                        computed_rotation, computed_altitude, captured_at, is_pano, thumb_url,
                        creator_id, creator_username, region_id, raw_data, cached_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(external_id) DO NOTHING
                    "#,
                )
                .bind(&photo.external_id)
                .bind(photo.lat)
                .bind(photo.lon)
                .bind(photo.compass_angle)
                .bind(photo.computed_compass_angle)
                .bind(photo.computed_rotation)
                .bind(photo.computed_altitude)
                .bind(photo.captured_at)
                .bind(photo.is_pano)
                .bind(&photo.thumb_url)
                .bind(&photo.creator_id)
                .bind(&photo.creator_username)
                .bind(region_id)
                .bind(&photo.raw_data)
                .bind(photo.cached_at)
                .execute(&mut *tx)
                .await?;
                inserted += result.rows_affected();
            }

            sqlx::query(
                r#"
                UPDATE cached_regions
                SET photo_count = photo_count + ?, last_updated = ?
                WHERE region_id = ?
                "#,
            )
            .bind(inserted as i64)
            .bind(OffsetDateTime::now_utc())
            .bind(region_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            tracing::debug!(
                region_id = %region_id,
                offered = photos.len(),
                inserted = inserted,
                "Inserted photo batch"
            );
            Ok(inserted)
        }

        async fn find_photos_in_viewport(
            &self,
            viewport: &BoundingBox,
            filter: &ContentFilter,
        ) -> MetadataResult<Vec<PhotoRow>> {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM cached_photos WHERE lat >= ");
            qb.push_bind(viewport.min_lat())
                .push(" AND lat <= ")
                .push_bind(viewport.max_lat())
                .push(" AND lon >= ")
                .push_bind(viewport.min_lon())
                .push(" AND lon <= ")
                .push_bind(viewport.max_lon());

            if !filter.hidden_photo_ids.is_empty() {
                qb.push(" AND external_id NOT IN (");
                let mut ids = qb.separated(", ");
                for id in &filter.hidden_photo_ids {
                    ids.push_bind(id.clone());
                }
                ids.push_unseparated(")");
            }

            if !filter.hidden_creator_ids.is_empty() {
                qb.push(" AND (creator_id IS NULL OR creator_id NOT IN (");
                let mut ids = qb.separated(", ");
                for id in &filter.hidden_creator_ids {
                    ids.push_bind(id.clone());
                }
                ids.push_unseparated("))");
            }

            qb.push(" ORDER BY external_id");

            let rows = qb
                .build_query_as::<PhotoRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn get_photo(&self, external_id: &str) -> MetadataResult<Option<PhotoRow>> {
            let row =
                sqlx::query_as::<_, PhotoRow>("SELECT * FROM cached_photos WHERE external_id = ?")
                    .bind(external_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl MaintenanceRepo for SqliteStore {
        async fn stats_snapshot(&self) -> MetadataResult<CacheStats> {
            let total_photos: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_photos")
                .fetch_one(&self.pool)
                .await?;
            let total_regions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_regions")
                .fetch_one(&self.pool)
                .await?;
            let complete_regions: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM cached_regions WHERE is_complete = ?")
                    .bind(true)
                    .fetch_one(&self.pool)
                    .await?;

            Ok(CacheStats {
                total_photos: total_photos as u64,
                total_regions: total_regions as u64,
                complete_regions: complete_regions as u64,
            })
        }

        async fn reset(&self) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM cached_photos")
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM cached_regions")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::warn!("Spatial store reset: all regions and photos deleted");
            Ok(())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Regions: rectangles fetched (or being fetched) from upstream
CREATE TABLE IF NOT EXISTS cached_regions (
    region_id BLOB PRIMARY KEY,
    min_lat REAL NOT NULL,
    min_lon REAL NOT NULL,
    max_lat REAL NOT NULL,
    max_lon REAL NOT NULL,
    is_complete INTEGER NOT NULL DEFAULT 0,
    has_more INTEGER NOT NULL DEFAULT 1,
    photo_count INTEGER NOT NULL DEFAULT 0,
    total_requests INTEGER NOT NULL DEFAULT 0,
    last_cursor TEXT,
    created_at TEXT NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_cached_regions_bounds
    ON cached_regions(min_lat, min_lon, max_lat, max_lon);
CREATE INDEX IF NOT EXISTS idx_cached_regions_complete ON cached_regions(is_complete);

-- Photos: one row per upstream id
CREATE TABLE IF NOT EXISTS cached_photos (
    external_id TEXT PRIMARY KEY,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    compass_angle REAL,
    computed_compass_angle REAL,
    computed_rotation REAL,
    computed_altitude REAL,
    captured_at TEXT,
    is_pano INTEGER NOT NULL DEFAULT 0,
    thumb_url TEXT,
    creator_id TEXT,
    creator_username TEXT,
    region_id BLOB NOT NULL REFERENCES cached_regions(region_id) ON DELETE CASCADE,
    raw_data TEXT,
    cached_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cached_photos_location ON cached_photos(lat, lon);
CREATE INDEX IF NOT EXISTS idx_cached_photos_region ON cached_photos(region_id);
CREATE INDEX IF NOT EXISTS idx_cached_photos_creator ON cached_photos(creator_id);
"#;
