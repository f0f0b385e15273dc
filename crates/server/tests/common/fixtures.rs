//! Test fixtures: photo sets and request helpers.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use viewfinder_core::{Creator, Photo, StreamEvent};

/// `n` photos spread row by row over a 10x10 grid inside the unit square
/// `[0, 1] x [0, 1]`. Ids are `p000`, `p001`, ...
#[allow(dead_code)]
pub fn grid_photos(n: usize) -> Vec<Photo> {
    (0..n)
        .map(|i| {
            let cell = i % 100;
            let lat = 0.05 + (cell / 10) as f64 / 10.0;
            let lon = 0.05 + (cell % 10) as f64 / 10.0;
            let mut photo = Photo::new(format!("p{i:03}"), lat, lon).unwrap();
            photo.compass_angle = Some((i * 37 % 360) as f64);
            photo
        })
        .collect()
}

/// `n` photos packed into the south-west corner of the unit square.
#[allow(dead_code)]
pub fn clustered_photos(n: usize) -> Vec<Photo> {
    (0..n)
        .map(|i| {
            let offset = i as f64 * 0.0001;
            Photo::new(format!("c{i:03}"), 0.01 + offset, 0.01 + offset).unwrap()
        })
        .collect()
}

/// Attach a creator to a photo.
#[allow(dead_code)]
pub fn with_creator(mut photo: Photo, creator_id: &str) -> Photo {
    photo.creator = Some(Creator {
        id: creator_id.to_string(),
        username: Some(format!("user-{creator_id}")),
    });
    photo
}

/// Stream URI for the unit square.
#[allow(dead_code)]
pub fn unit_square_uri(client_id: &str) -> String {
    viewport_uri(1.0, 0.0, 0.0, 1.0, client_id)
}

#[allow(dead_code)]
pub fn viewport_uri(tl_lat: f64, tl_lon: f64, br_lat: f64, br_lon: f64, client_id: &str) -> String {
    format!(
        "/v1/imagery/stream?top_left_lat={tl_lat}&top_left_lon={tl_lon}\
         &bottom_right_lat={br_lat}&bottom_right_lon={br_lon}&client_id={client_id}"
    )
}

/// Issue a GET and return status, content type and raw body.
#[allow(dead_code)]
pub async fn get_raw(router: &axum::Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, content_type, body.to_vec())
}

/// Issue a GET and parse the body as JSON.
#[allow(dead_code)]
pub async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get_raw(router, uri).await;
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Run a stream request to completion and parse every NDJSON line.
#[allow(dead_code)]
pub async fn stream_events(router: &axum::Router, uri: &str) -> Vec<StreamEvent> {
    let (status, content_type, body) = get_raw(router, uri).await;
    assert_eq!(status, StatusCode::OK, "stream request failed");
    assert_eq!(content_type.as_deref(), Some("application/x-ndjson"));

    let text = String::from_utf8(body).unwrap();
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Sizes of every `photos` event, in order.
#[allow(dead_code)]
pub fn photo_batch_sizes(events: &[StreamEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Photos { photos, .. } => Some(photos.len()),
            _ => None,
        })
        .collect()
}

/// Ids of every streamed photo, in order.
#[allow(dead_code)]
pub fn streamed_ids(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Photos { photos, .. } => Some(photos.iter().map(|p| p.id.clone())),
            _ => None,
        })
        .flatten()
        .collect()
}
