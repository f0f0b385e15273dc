//! Photo metadata as exchanged with clients and the upstream imagery API.

use crate::bbox::{MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::OffsetDateTime;

/// GeoJSON-style point geometry. Coordinates are `[lon, lat]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
}

/// The account that captured a photo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A geo-located photo record.
///
/// The serialized form matches the upstream API field names so cached and
/// live photos are indistinguishable to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    /// Upstream identifier, unique across the store.
    pub id: String,
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compass_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_compass_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_altitude: Option<f64>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub captured_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub is_pano: bool,
    #[serde(
        rename = "thumb_1024_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thumb_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
}

impl Photo {
    /// Create a photo with only an id and a location.
    pub fn new(id: impl Into<String>, lat: f64, lon: f64) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidPhoto("photo id cannot be empty".to_string()));
        }
        if !lat.is_finite() || !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return Err(crate::Error::InvalidPhoto(format!(
                "photo {id} has invalid latitude {lat}"
            )));
        }
        if !lon.is_finite() || !(MIN_LON..=MAX_LON).contains(&lon) {
            return Err(crate::Error::InvalidPhoto(format!(
                "photo {id} has invalid longitude {lon}"
            )));
        }

        Ok(Self {
            id,
            geometry: Geometry::Point {
                coordinates: [lon, lat],
            },
            compass_angle: None,
            computed_compass_angle: None,
            computed_rotation: None,
            computed_altitude: None,
            captured_at: None,
            is_pano: false,
            thumb_url: None,
            creator: None,
        })
    }

    pub fn lat(&self) -> f64 {
        match self.geometry {
            Geometry::Point { coordinates } => coordinates[1],
        }
    }

    pub fn lon(&self) -> f64 {
        match self.geometry {
            Geometry::Point { coordinates } => coordinates[0],
        }
    }

    pub fn creator_id(&self) -> Option<&str> {
        self.creator.as_ref().map(|c| c.id.as_str())
    }
}

/// Order photos by compass angle; a missing angle sorts as 0.
pub fn sort_by_compass_angle(photos: &mut [Photo]) {
    photos.sort_by(|a, b| {
        let a = a.compass_angle.unwrap_or(0.0);
        let b = b.compass_angle.unwrap_or(0.0);
        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_in_upstream_shape() {
        let mut photo = Photo::new("123", 50.08, 14.42).unwrap();
        photo.compass_angle = Some(90.0);
        photo.thumb_url = Some("https://img.example/123.jpg".to_string());
        photo.creator = Some(Creator {
            id: "c1".to_string(),
            username: Some("alice".to_string()),
        });

        let value = serde_json::to_value(&photo).unwrap();
        assert_eq!(
            value["geometry"],
            json!({"type": "Point", "coordinates": [14.42, 50.08]})
        );
        assert_eq!(value["thumb_1024_url"], "https://img.example/123.jpg");
        assert_eq!(value["creator"]["username"], "alice");
        assert!(value.get("computed_altitude").is_none());

        let back: Photo = serde_json::from_value(value).unwrap();
        assert_eq!(back, photo);
    }

    #[test]
    fn test_new_rejects_bad_location() {
        assert!(Photo::new("", 0.0, 0.0).is_err());
        assert!(Photo::new("a", 95.0, 0.0).is_err());
        assert!(Photo::new("a", 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_sort_by_compass_angle_treats_missing_as_zero() {
        let mut a = Photo::new("a", 0.0, 0.0).unwrap();
        a.compass_angle = Some(270.0);
        let b = Photo::new("b", 0.0, 0.0).unwrap();
        let mut c = Photo::new("c", 0.0, 0.0).unwrap();
        c.compass_angle = Some(45.0);

        let mut photos = vec![a, b, c];
        sort_by_compass_angle(&mut photos);
        let ids: Vec<_> = photos.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }
}
