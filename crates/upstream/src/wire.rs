//! Decoding of upstream images responses.
//!
//! The upstream API is loose about a few field types, so items are decoded
//! through a permissive wire shape and then validated into [`Photo`].

use crate::traits::{FetchOutcome, FetchedPhoto, Page, Paging};
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use viewfinder_core::{Creator, Geometry, Photo};

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    paging: WirePaging,
}

#[derive(Debug, Default, Deserialize)]
struct WirePaging {
    next: Option<String>,
    #[serde(default)]
    cursors: WireCursors,
}

#[derive(Debug, Default, Deserialize)]
struct WireCursors {
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(u64),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRotation {
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct WireCreator {
    id: WireId,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePhoto {
    id: WireId,
    geometry: Geometry,
    compass_angle: Option<f64>,
    computed_compass_angle: Option<f64>,
    computed_rotation: Option<WireRotation>,
    computed_altitude: Option<f64>,
    captured_at: Option<WireTimestamp>,
    #[serde(default)]
    is_pano: Option<bool>,
    thumb_1024_url: Option<String>,
    creator: Option<WireCreator>,
}

/// Decode a full response body into a page.
///
/// Items that do not decode are skipped with a warning. Only a body that is
/// not a response object at all is an error.
pub fn decode_page(body: &[u8]) -> serde_json::Result<Page> {
    let response: ImagesResponse = serde_json::from_slice(body)?;

    let total = response.data.len();
    let data: Vec<FetchedPhoto> = response
        .data
        .into_iter()
        .filter_map(|raw| match decode_photo(&raw) {
            Ok(photo) => Some(FetchedPhoto { photo, raw }),
            Err(reason) => {
                tracing::warn!(reason = %reason, "Skipping undecodable upstream item");
                None
            }
        })
        .collect();

    if data.len() < total {
        tracing::debug!(
            decoded = data.len(),
            skipped = total - data.len(),
            "Upstream page had undecodable items"
        );
    }

    Ok(Page {
        data,
        received: total,
        paging: Paging {
            has_next: response.paging.next.is_some(),
            after: response.paging.cursors.after,
        },
        outcome: FetchOutcome::Ok,
    })
}

/// Decode and validate a single upstream item.
pub fn decode_photo(item: &Value) -> Result<Photo, String> {
    let wire = WirePhoto::deserialize(item).map_err(|e| e.to_string())?;
    let Geometry::Point { coordinates } = wire.geometry;
    let mut photo =
        Photo::new(wire.id.into_string(), coordinates[1], coordinates[0]).map_err(|e| e.to_string())?;

    photo.compass_angle = wire.compass_angle;
    photo.computed_compass_angle = wire.computed_compass_angle;
    photo.computed_rotation = wire.computed_rotation.and_then(|r| match r {
        WireRotation::Scalar(v) => Some(v),
        WireRotation::Vector(v) => v.first().copied(),
    });
    photo.computed_altitude = wire.computed_altitude;
    photo.captured_at = wire.captured_at.and_then(parse_timestamp);
    photo.is_pano = wire.is_pano.unwrap_or(false);
    photo.thumb_url = wire.thumb_1024_url;
    photo.creator = wire.creator.map(|c| Creator {
        id: c.id.into_string(),
        username: c.username,
    });

    Ok(photo)
}

fn parse_timestamp(ts: WireTimestamp) -> Option<OffsetDateTime> {
    match ts {
        WireTimestamp::Millis(ms) => {
            let nanos = (ms * 1_000_000.0) as i128;
            OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
        }
        WireTimestamp::Text(text) => OffsetDateTime::parse(&text, &Rfc3339).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_page_with_cursor() {
        let body = json!({
            "data": [
                {"id": "1", "geometry": {"type": "Point", "coordinates": [14.4, 50.1]}},
                {"id": "2", "geometry": {"type": "Point", "coordinates": [14.5, 50.2]}}
            ],
            "paging": {"next": "https://upstream/next", "cursors": {"after": "c2"}}
        });

        let page = decode_page(body.to_string().as_bytes()).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].photo.lat(), 50.1);
        assert_eq!(page.data[0].photo.lon(), 14.4);
        assert_eq!(page.paging.next_cursor(), Some("c2"));
    }

    #[test]
    fn test_cursor_without_next_ends_pagination() {
        let body = json!({"data": [], "paging": {"cursors": {"after": "c9"}}});
        let page = decode_page(body.to_string().as_bytes()).unwrap();
        assert!(!page.paging.has_next);
        assert_eq!(page.paging.next_cursor(), None);
    }

    #[test]
    fn test_missing_paging_is_last_page() {
        let page = decode_page(br#"{"data": []}"#).unwrap();
        assert!(page.is_empty());
        assert!(page.is_exhausted());
        assert!(!page.paging.has_next);
    }

    #[test]
    fn test_malformed_items_are_skipped() {
        let body = json!({
            "data": [
                {"id": "ok", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}},
                {"id": "no-geometry"},
                {"id": "bad-lat", "geometry": {"type": "Point", "coordinates": [1.0, 95.0]}},
                "not an object"
            ]
        });

        let page = decode_page(body.to_string().as_bytes()).unwrap();
        let ids: Vec<_> = page.data.iter().map(|p| p.photo.id.as_str()).collect();
        assert_eq!(ids, ["ok"]);
        assert_eq!(page.received, 4);
    }

    #[test]
    fn test_all_items_undecodable_keeps_cursor() {
        let body = json!({
            "data": [{"id": "x"}, {"id": "y"}],
            "paging": {"next": "https://upstream/next", "cursors": {"after": "c1"}}
        });

        let page = decode_page(body.to_string().as_bytes()).unwrap();
        assert!(page.is_empty());
        assert!(!page.is_exhausted());
        assert_eq!(page.paging.next_cursor(), Some("c1"));
    }

    #[test]
    fn test_non_object_body_is_error() {
        assert!(decode_page(b"<html>busy</html>").is_err());
    }

    #[test]
    fn test_loose_field_types() {
        let item = json!({
            "id": 12345,
            "geometry": {"type": "Point", "coordinates": [14.0, 50.0]},
            "computed_rotation": [0.5, 1.5, 2.5],
            "captured_at": 1_600_000_000_000i64,
            "is_pano": true,
            "thumb_1024_url": "https://img.example/1.jpg",
            "creator": {"id": 77, "username": "alice"}
        });

        let photo = decode_photo(&item).unwrap();
        assert_eq!(photo.id, "12345");
        assert_eq!(photo.computed_rotation, Some(0.5));
        assert_eq!(
            photo.captured_at.map(|t| t.unix_timestamp()),
            Some(1_600_000_000)
        );
        assert!(photo.is_pano);
        assert_eq!(photo.thumb_url.as_deref(), Some("https://img.example/1.jpg"));
        assert_eq!(photo.creator_id(), Some("77"));
    }

    #[test]
    fn test_rfc3339_timestamp_and_empty_rotation() {
        let item = json!({
            "id": "a",
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
            "computed_rotation": [],
            "captured_at": "2024-05-01T12:00:00Z"
        });

        let photo = decode_photo(&item).unwrap();
        assert_eq!(photo.computed_rotation, None);
        assert_eq!(
            photo.captured_at.map(|t| t.unix_timestamp()),
            Some(1_714_564_800)
        );
    }
}
