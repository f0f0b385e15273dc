//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::photos::ID_LOOKUP_CHUNK;
use crate::repos::{MaintenanceRepo, PhotoRepo, RegionRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, QueryBuilder};
use std::collections::HashSet;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;
use viewfinder_core::config::PgSslMode;
use viewfinder_core::{BoundingBox, ContentFilter};

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from a separate environment variable instead of
    /// being embedded in a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn touch_region_by_bounds(&self, bbox: &BoundingBox) -> MetadataResult<Option<RegionRow>> {
        let row = sqlx::query_as::<_, RegionRow>(
            r#"
            UPDATE cached_regions
            SET total_requests = total_requests + 1
            WHERE min_lat = $1 AND min_lon = $2 AND max_lat = $3 AND max_lon = $4
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
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RegionRepo for PostgresStore {
    async fn find_intersecting_regions(
        &self,
        viewport: &BoundingBox,
    ) -> MetadataResult<Vec<RegionRow>> {
        let rows = sqlx::query_as::<_, RegionRow>(
            r#"
            SELECT * FROM cached_regions
            WHERE min_lat <= $1 AND max_lat >= $2 AND min_lon <= $3 AND max_lon >= $4
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
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
        .await
        .map_err(MetadataError::from);

        match inserted {
            Ok(_) => {
                tracing::debug!(region_id = %region.region_id, bbox = %bbox, "Created region");
                Ok(region)
            }
            Err(e) if e.is_unique_violation() => {
                tracing::debug!(bbox = %bbox, "Region created concurrently, re-reading");
                self.touch_region_by_bounds(bbox).await?.ok_or_else(|| {
                    MetadataError::Internal(format!(
                        "region {bbox} conflicted on insert but could not be re-read"
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_region(&self, region_id: Uuid) -> MetadataResult<Option<RegionRow>> {
        let row = sqlx::query_as::<_, RegionRow>("SELECT * FROM cached_regions WHERE region_id = $1")
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
            SET is_complete = TRUE, has_more = FALSE,
                last_cursor = COALESCE($1, last_cursor), last_updated = $2
            WHERE region_id = $3
            "#,
        )
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
            SET last_cursor = $1, has_more = $2, last_updated = $3
            WHERE region_id = $4 AND is_complete = FALSE
            "#,
        )
        .bind(cursor)
        .bind(cursor.is_some())
        .bind(OffsetDateTime::now_utc())
        .bind(region_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate_region(&self, region_id: Uuid) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;

        let photos = sqlx::query("DELETE FROM cached_photos WHERE region_id = $1")
            .bind(region_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let regions = sqlx::query("DELETE FROM cached_regions WHERE region_id = $1")
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
impl PhotoRepo for PostgresStore {
    async fn insert_photo_batch(&self, region_id: Uuid, photos: &[PhotoRow]) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;

        let mut known: HashSet<String> = HashSet::new();
        for chunk in photos.chunks(ID_LOOKUP_CHUNK) {
            let ids: Vec<String> = chunk.iter().map(|p| p.external_id.clone()).collect();
            let found: Vec<String> = sqlx::query_scalar(
                "SELECT external_id FROM cached_photos WHERE external_id = ANY($1)",
            )
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;
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
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
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
            SET photo_count = photo_count + $1, last_updated = $2
            WHERE region_id = $3
            "#,
        )
        .bind(inserted as i64)
        .bind(OffsetDateTime::now_utc())
        .bind(region_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_photos_in_viewport(
        &self,
        viewport: &BoundingBox,
        filter: &ContentFilter,
    ) -> MetadataResult<Vec<PhotoRow>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM cached_photos WHERE lat >= ");
        qb.push_bind(viewport.min_lat())
            .push(" AND lat <= ")
            .push_bind(viewport.max_lat())
            .push(" AND lon >= ")
            .push_bind(viewport.min_lon())
            .push(" AND lon <= ")
            .push_bind(viewport.max_lon());

        if !filter.hidden_photo_ids.is_empty() {
            let ids: Vec<String> = filter.hidden_photo_ids.iter().cloned().collect();
            qb.push(" AND external_id <> ALL(").push_bind(ids).push(")");
        }

        if !filter.hidden_creator_ids.is_empty() {
            let ids: Vec<String> = filter.hidden_creator_ids.iter().cloned().collect();
            qb.push(" AND (creator_id IS NULL OR creator_id <> ALL(")
                .push_bind(ids)
                .push("))");
        }

        qb.push(" ORDER BY external_id");

        let rows = qb
            .build_query_as::<PhotoRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_photo(&self, external_id: &str) -> MetadataResult<Option<PhotoRow>> {
        let row = sqlx::query_as::<_, PhotoRow>("SELECT * FROM cached_photos WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl MaintenanceRepo for PostgresStore {
    async fn stats_snapshot(&self) -> MetadataResult<CacheStats> {
        let (total_photos, total_regions, complete_regions): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM cached_photos),
                (SELECT COUNT(*) FROM cached_regions),
                (SELECT COUNT(*) FROM cached_regions WHERE is_complete)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            total_photos: total_photos as u64,
            total_regions: total_regions as u64,
            complete_regions: complete_regions as u64,
        })
    }

    async fn reset(&self) -> MetadataResult<()> {
        sqlx::query("TRUNCATE cached_photos, cached_regions")
            .execute(&self.pool)
            .await?;
        tracing::warn!("Spatial store reset: all regions and photos deleted");
        Ok(())
    }
}
