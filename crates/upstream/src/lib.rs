//! Upstream imagery client for Viewfinder.
//!
//! This crate provides:
//! - The `PhotoSource` trait the stream coordinator pages through
//! - An HTTP backend with a process-wide request quota
//! - A scripted in-memory backend for tests and offline runs
//! - Decoding of the upstream response shape

pub mod backends;
pub mod error;
pub mod traits;
pub mod wire;

pub use backends::{http::HttpSource, scripted::RecordedRequest, scripted::ScriptedSource};
pub use error::{UpstreamError, UpstreamResult};
pub use traits::{FetchOutcome, FetchedPhoto, Page, Paging, PhotoSource};

use std::sync::Arc;
use viewfinder_core::config::UpstreamConfig;

/// Create a photo source from configuration.
pub fn from_config(config: &UpstreamConfig) -> UpstreamResult<Arc<dyn PhotoSource>> {
    let source = HttpSource::new(config)?;
    Ok(Arc::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_rejects_invalid_page_size() {
        let config = UpstreamConfig {
            access_token: Some("token".to_string()),
            page_size: 0,
            ..UpstreamConfig::default()
        };

        match from_config(&config) {
            Ok(_) => panic!("expected error"),
            Err(UpstreamError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn from_config_ok_with_token() {
        let config = UpstreamConfig {
            access_token: Some("token".to_string()),
            ..UpstreamConfig::default()
        };
        let source = from_config(&config).unwrap();
        drop(source);
    }
}
