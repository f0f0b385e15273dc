//! PostgreSQL integration tests.
//!
//! These run against a live database named by VIEWFINDER_TEST_POSTGRES_URL
//! and are skipped when it is unset. The database is reset, so never point
//! this at real data.

use futures::future::join_all;
use std::sync::Arc;
use time::OffsetDateTime;
use viewfinder_core::{BoundingBox, ContentFilter, Creator, Photo};
use viewfinder_metadata::{MaintenanceRepo, PhotoRepo, PhotoRow, PostgresStore, RegionRepo};

async fn postgres_or_skip() -> Option<Arc<PostgresStore>> {
    let Ok(url) = std::env::var("VIEWFINDER_TEST_POSTGRES_URL") else {
        eprintln!("Skipping PostgreSQL test: VIEWFINDER_TEST_POSTGRES_URL not set");
        return None;
    };
    let store = PostgresStore::from_url(&url, 5, Some(10_000))
        .await
        .expect("PostgreSQL test setup failed");
    store.reset().await.expect("failed to reset test database");
    Some(Arc::new(store))
}

fn photo(id: &str, lat: f64, lon: f64, creator: Option<&str>) -> Photo {
    let mut photo = Photo::new(id, lat, lon).unwrap();
    photo.creator = creator.map(|c| Creator {
        id: c.to_string(),
        username: None,
    });
    photo
}

// One test so the shared database is never reset underneath another.
#[tokio::test]
async fn test_postgres_region_and_photo_lifecycle() {
    let Some(store) = postgres_or_skip().await else {
        return;
    };
    let bbox = BoundingBox::new(50.0, 14.0, 50.1, 14.1).unwrap();

    // Concurrent creation converges on one region.
    let handles = (0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.create_region_if_absent(&bbox).await.unwrap() })
    });
    let regions: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let region_id = regions[0].region_id;
    assert!(regions.iter().all(|r| r.region_id == region_id));
    assert_eq!(store.stats_snapshot().await.unwrap().total_regions, 1);

    // Batch insert dedups by external id.
    let now = OffsetDateTime::now_utc();
    let rows: Vec<PhotoRow> = [
        photo("a", 50.01, 14.01, None),
        photo("b", 50.02, 14.02, Some("bob")),
        photo("c", 50.1, 14.1, None),
    ]
    .iter()
    .map(|p| PhotoRow::from_photo(p, region_id, Some("{}".to_string()), now))
    .collect();
    assert_eq!(store.insert_photo_batch(region_id, &rows).await.unwrap(), 3);
    assert_eq!(store.insert_photo_batch(region_id, &rows).await.unwrap(), 0);

    // Closed-interval viewport query with a filter.
    let mut filter = ContentFilter::default();
    filter.hidden_creator_ids.insert("bob".to_string());
    let found = store.find_photos_in_viewport(&bbox, &filter).await.unwrap();
    let ids: Vec<_> = found.iter().map(|r| r.external_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);

    // Cursor progress, then monotonic completion.
    store
        .update_region_cursor(region_id, Some("page-2"))
        .await
        .unwrap();
    store.mark_region_complete(region_id, None).await.unwrap();
    store
        .update_region_cursor(region_id, Some("page-3"))
        .await
        .unwrap();
    let region = store.get_region(region_id).await.unwrap().unwrap();
    assert!(region.is_complete);
    assert_eq!(region.last_cursor.as_deref(), Some("page-2"));
    assert_eq!(region.photo_count, 3);

    let intersecting = store
        .find_intersecting_regions(&BoundingBox::new(50.1, 14.1, 50.2, 14.2).unwrap())
        .await
        .unwrap();
    assert_eq!(intersecting.len(), 1);

    let stats = store.stats_snapshot().await.unwrap();
    assert_eq!(stats.total_photos, 3);
    assert_eq!(stats.complete_regions, 1);

    assert_eq!(store.invalidate_region(region_id).await.unwrap(), 3);
    assert_eq!(
        store.stats_snapshot().await.unwrap(),
        viewfinder_metadata::CacheStats::default()
    );
}
