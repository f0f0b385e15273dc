//! Core domain types and shared logic for Viewfinder.
//!
//! This crate defines the data model and the pure algorithms used by the
//! other crates:
//! - Bounding boxes and viewport validation
//! - Photo records in the upstream wire shape
//! - Coverage computation over complete regions
//! - Grid sampling with a distribution score
//! - Hidden-content filters
//! - Stream events and configuration

pub mod bbox;
pub mod config;
pub mod coverage;
pub mod error;
pub mod event;
pub mod filter;
pub mod photo;
pub mod sampling;

pub use bbox::BoundingBox;
pub use coverage::{RegionCoverage, is_fully_covered, uncovered_sub_areas};
pub use error::{Error, Result};
pub use event::StreamEvent;
pub use filter::{ContentFilter, HiddenContentSource, NoHiddenContent, PhotoOrigin, StaticHiddenContent};
pub use photo::{Creator, Geometry, Photo, sort_by_compass_angle};
pub use sampling::{SampledPhotos, Sampler};
