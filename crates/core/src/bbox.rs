//! Axis-aligned geographic rectangles.
//!
//! Latitude maps to the `y` axis and longitude to the `x` axis when a
//! [`BoundingBox`] is converted to a [`geo::Rect`]. All comparisons use
//! closed intervals: two boxes that share only an edge still intersect.

use geo::{Intersects, Rect, coord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latitude bounds in degrees.
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;

/// Longitude bounds in degrees.
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// A validated bounding box with `min < max` on both axes.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoundsRepr", into = "BoundsRepr")]
pub struct BoundingBox {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct BoundsRepr {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

impl TryFrom<BoundsRepr> for BoundingBox {
    type Error = crate::Error;

    fn try_from(repr: BoundsRepr) -> crate::Result<Self> {
        Self::new(repr.min_lat, repr.min_lon, repr.max_lat, repr.max_lon)
    }
}

impl From<BoundingBox> for BoundsRepr {
    fn from(bbox: BoundingBox) -> Self {
        Self {
            min_lat: bbox.min_lat,
            min_lon: bbox.min_lon,
            max_lat: bbox.max_lat,
            max_lon: bbox.max_lon,
        }
    }
}

fn check_lat(value: f64, name: &str) -> crate::Result<()> {
    if !value.is_finite() || !(MIN_LAT..=MAX_LAT).contains(&value) {
        return Err(crate::Error::InvalidCoordinate(format!(
            "{name} must be a finite latitude in [{MIN_LAT}, {MAX_LAT}], got {value}"
        )));
    }
    Ok(())
}

fn check_lon(value: f64, name: &str) -> crate::Result<()> {
    if !value.is_finite() || !(MIN_LON..=MAX_LON).contains(&value) {
        return Err(crate::Error::InvalidCoordinate(format!(
            "{name} must be a finite longitude in [{MIN_LON}, {MAX_LON}], got {value}"
        )));
    }
    Ok(())
}

impl BoundingBox {
    /// Create a bounding box from ordered bounds.
    ///
    /// Fails if any bound is non-finite or out of range, or if the box has
    /// zero width or height.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> crate::Result<Self> {
        check_lat(min_lat, "min_lat")?;
        check_lat(max_lat, "max_lat")?;
        check_lon(min_lon, "min_lon")?;
        check_lon(max_lon, "max_lon")?;

        if min_lat >= max_lat || min_lon >= max_lon {
            return Err(crate::Error::InvalidViewport(format!(
                "bounding box must have positive area: lat [{min_lat}, {max_lat}], lon [{min_lon}, {max_lon}]"
            )));
        }

        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Create a bounding box from the top-left and bottom-right corners of
    /// a map viewport.
    ///
    /// Inverted corners are normalised, so a caller that swaps top and
    /// bottom still gets the same box.
    pub fn from_corners(
        top_left_lat: f64,
        top_left_lon: f64,
        bottom_right_lat: f64,
        bottom_right_lon: f64,
    ) -> crate::Result<Self> {
        check_lat(top_left_lat, "top_left_lat")?;
        check_lat(bottom_right_lat, "bottom_right_lat")?;
        check_lon(top_left_lon, "top_left_lon")?;
        check_lon(bottom_right_lon, "bottom_right_lon")?;

        Self::new(
            top_left_lat.min(bottom_right_lat),
            top_left_lon.min(bottom_right_lon),
            top_left_lat.max(bottom_right_lat),
            top_left_lon.max(bottom_right_lon),
        )
    }

    /// Convert a `geo` rectangle (x = longitude, y = latitude).
    pub fn from_rect(rect: Rect<f64>) -> crate::Result<Self> {
        Self::new(rect.min().y, rect.min().x, rect.max().y, rect.max().x)
    }

    /// Convert to a `geo` rectangle (x = longitude, y = latitude).
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lon, y: self.min_lat },
            coord! { x: self.max_lon, y: self.max_lat },
        )
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    /// Extent along the latitude axis, in degrees.
    pub fn lat_span(&self) -> f64 {
        self.to_rect().height()
    }

    /// Extent along the longitude axis, in degrees.
    pub fn lon_span(&self) -> f64 {
        self.to_rect().width()
    }

    /// Whether the two boxes share at least one point.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.to_rect().intersects(&other.to_rect())
    }

    /// The overlapping part of two boxes, if it has positive area.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min_lat = self.min_lat.max(other.min_lat);
        let min_lon = self.min_lon.max(other.min_lon);
        let max_lat = self.max_lat.min(other.max_lat);
        let max_lon = self.max_lon.min(other.max_lon);

        if min_lat < max_lat && min_lon < max_lon {
            Some(Self {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            })
        } else {
            None
        }
    }

    /// Whether `other` lies entirely within this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.min_lat
            && self.min_lon <= other.min_lon
            && self.max_lat >= other.max_lat
            && self.max_lon >= other.max_lon
    }

    /// Whether the point lies within this box (edges included).
    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

impl fmt::Debug for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundingBox({self})")
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}]",
            self.min_lat, self.max_lat, self.min_lon, self.max_lon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> BoundingBox {
        BoundingBox::new(min_lat, min_lon, max_lat, max_lon).unwrap()
    }

    #[test]
    fn test_from_corners_normalises_inverted_viewport() {
        let normal = BoundingBox::from_corners(50.1, 14.3, 50.0, 14.5).unwrap();
        let inverted = BoundingBox::from_corners(50.0, 14.5, 50.1, 14.3).unwrap();
        assert_eq!(normal, inverted);
        assert_eq!(normal.min_lat(), 50.0);
        assert_eq!(normal.max_lon(), 14.5);
    }

    #[test]
    fn test_zero_area_rejected() {
        assert!(BoundingBox::from_corners(50.0, 14.3, 50.0, 14.5).is_err());
        assert!(BoundingBox::from_corners(50.1, 14.3, 50.0, 14.3).is_err());
    }

    #[test]
    fn test_out_of_range_and_non_finite_rejected() {
        assert!(BoundingBox::new(-91.0, 0.0, 0.0, 1.0).is_err());
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 181.0).is_err());
        assert!(BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_err());
        assert!(BoundingBox::from_corners(f64::INFINITY, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_edge_contact_counts_as_intersection() {
        let a = bbox(0.0, 0.0, 1.0, 1.0);
        let b = bbox(1.0, 0.0, 2.0, 1.0);
        assert!(a.intersects(&b));
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_intersection_clips_to_overlap() {
        let a = bbox(0.0, 0.0, 2.0, 2.0);
        let b = bbox(1.0, 1.0, 3.0, 3.0);
        assert_eq!(a.intersection(&b), Some(bbox(1.0, 1.0, 2.0, 2.0)));
        assert!(!a.intersects(&bbox(5.0, 5.0, 6.0, 6.0)));
    }

    #[test]
    fn test_rect_conversion_maps_lon_to_x() {
        let b = bbox(10.0, 20.0, 11.0, 22.0);
        let rect = b.to_rect();
        assert_eq!(rect.min().x, 20.0);
        assert_eq!(rect.min().y, 10.0);
        assert_eq!(BoundingBox::from_rect(rect).unwrap(), b);
        assert_eq!(b.lon_span(), 2.0);
        assert_eq!(b.lat_span(), 1.0);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: BoundingBox =
            serde_json::from_str(r#"{"min_lat":0,"min_lon":0,"max_lat":1,"max_lon":1}"#).unwrap();
        assert!(ok.contains_point(1.0, 0.0));
        let bad = serde_json::from_str::<BoundingBox>(
            r#"{"min_lat":1,"min_lon":0,"max_lat":0,"max_lon":1}"#,
        );
        assert!(bad.is_err());
    }
}
