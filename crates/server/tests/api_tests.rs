//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::{Value, json};
use tower::ServiceExt;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let (status, body) = get_json(&server.router, "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_stats_on_empty_store() {
    let server = TestServer::new().await;

    let (status, body) = get_json(&server.router, "/v1/imagery/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "total_cached_photos": 0,
            "total_cached_regions": 0,
            "complete_cached_regions": 0,
            "cache_efficiency": 0.0
        })
    );
}

#[tokio::test]
async fn test_stats_after_streams() {
    let server = TestServer::with_config(|c| c.streaming.max_photos_per_request = 40).await;
    server.upstream.set_photos(grid_photos(100));

    // The western strip completes; the eastern part stops at the cap.
    stream_events(&server.router, &viewport_uri(1.0, 0.0, 0.0, 0.3, "alice")).await;
    stream_events(&server.router, &viewport_uri(1.0, 0.32, 0.0, 1.0, "alice")).await;

    let (status, body) = get_json(&server.router, "/v1/imagery/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_cached_regions"], 2);
    assert_eq!(body["complete_cached_regions"], 1);
    assert_eq!(body["cache_efficiency"], 50.0);
    // 30 from the western strip, 2 full pages of 30 from the eastern part.
    assert_eq!(body["total_cached_photos"], 90);
}

#[tokio::test]
async fn test_stream_response_headers() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .uri(unit_square_uri("alice"))
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/x-ndjson");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.ends_with('\n'));
    for line in text.lines() {
        let _: Value = serde_json::from_str(line).unwrap();
    }
}

#[tokio::test]
async fn test_stream_rejects_invalid_viewports() {
    let server = TestServer::new().await;

    let cases = [
        viewport_uri(95.0, 0.0, 0.0, 1.0, "alice"),
        viewport_uri(1.0, -181.0, 0.0, 1.0, "alice"),
        // Zero height.
        viewport_uri(1.0, 0.0, 1.0, 1.0, "alice"),
        // Zero width.
        viewport_uri(1.0, 0.5, 0.0, 0.5, "alice"),
        "/v1/imagery/stream?top_left_lat=abc&top_left_lon=0&bottom_right_lat=0\
         &bottom_right_lon=1&client_id=alice"
            .to_string(),
        "/v1/imagery/stream?top_left_lat=1&top_left_lon=0&bottom_right_lat=0&client_id=alice"
            .to_string(),
        "/v1/imagery/stream?top_left_lat=NaN&top_left_lon=0&bottom_right_lat=0\
         &bottom_right_lon=1&client_id=alice"
            .to_string(),
    ];

    for uri in cases {
        let (status, body) = get_json(&server.router, &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {uri}");
        assert_eq!(body["code"], "bad_request", "uri: {uri}");
    }

    assert!(server.upstream.requests().is_empty());
    let stats = server.metadata().stats_snapshot().await.unwrap();
    assert_eq!(stats.total_regions, 0);
}

#[tokio::test]
async fn test_stream_requires_client_id() {
    let server = TestServer::new().await;

    let uri = "/v1/imagery/stream?top_left_lat=1&top_left_lon=0\
               &bottom_right_lat=0&bottom_right_lon=1";
    let (status, body) = get_json(&server.router, uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    assert!(body["message"].as_str().unwrap().contains("client_id"));
}

#[tokio::test]
async fn test_inverted_corners_are_normalised() {
    let server = TestServer::new().await;
    server.upstream.set_photos(grid_photos(5));

    // Top-left given as the south-east corner.
    let events = stream_events(&server.router, &viewport_uri(0.0, 1.0, 1.0, 0.0, "alice")).await;
    assert_eq!(photo_batch_sizes(&events), vec![0, 5]);

    let requests = server.upstream.requests();
    assert_eq!(requests[0].bbox.min_lat(), 0.0);
    assert_eq!(requests[0].bbox.max_lon(), 1.0);
}

#[tokio::test]
async fn test_metrics_endpoint_disabled_by_default() {
    let server = TestServer::new().await;

    let (status, _, _) = get_raw(&server.router, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint_when_enabled() {
    viewfinder_server::metrics::register_metrics();
    let server = TestServer::with_config(|c| c.server.metrics_enabled = true).await;
    server.upstream.set_photos(grid_photos(3));
    stream_events(&server.router, &unit_square_uri("alice")).await;

    let (status, content_type, body) = get_raw(&server.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("viewfinder_stream_requests_total"));
    assert!(text.contains("viewfinder_upstream_requests_total"));
}
