//! Application state shared across handlers.

use crate::rate_gate::RateGate;
use std::sync::Arc;
use std::time::Duration;
use viewfinder_core::HiddenContentSource;
use viewfinder_core::config::AppConfig;
use viewfinder_metadata::MetadataStore;
use viewfinder_upstream::PhotoSource;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Spatial store for regions and photos.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upstream imagery source.
    pub upstream: Arc<dyn PhotoSource>,
    /// Per-caller hidden photos and creators.
    pub hidden_content: Arc<dyn HiddenContentSource>,
    /// Per-caller spacing of upstream requests.
    pub rate_gate: RateGate,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Validates the configuration and logs warnings for settings that are
    /// allowed but probably unintended.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        upstream: Arc<dyn PhotoSource>,
        hidden_content: Arc<dyn HiddenContentSource>,
    ) -> Result<Self, String> {
        for warning in config.validate()? {
            tracing::warn!("Configuration warning: {}", warning);
        }

        let rate_gate = RateGate::new(&config.rate_gate);

        Ok(Self {
            config: Arc::new(config),
            metadata,
            upstream,
            hidden_content,
            rate_gate,
        })
    }

    /// Interval for the rate gate cleanup task.
    pub fn rate_gate_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.config.rate_gate.cleanup_interval_secs)
    }
}
