//! Viewfinder server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viewfinder_core::NoHiddenContent;
use viewfinder_core::config::AppConfig;
use viewfinder_server::{AppState, create_router};
use viewfinder_upstream::{PhotoSource, ScriptedSource};

/// Viewfinder - geospatial photo cache and streaming server
#[derive(Parser, Debug)]
#[command(name = "viewfinderd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "VIEWFINDER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional file plus `VIEWFINDER_*` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path,
            "No config file found, using defaults and environment variables"
        );
    }

    figment
        .merge(Env::prefixed("VIEWFINDER_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Build the upstream source. Without live fetching no token is needed, so
/// an empty in-memory source stands in.
fn build_upstream(config: &AppConfig) -> Result<Arc<dyn PhotoSource>> {
    if !config.streaming.live_enabled {
        tracing::info!("Live fetching disabled, upstream source not configured");
        return Ok(Arc::new(ScriptedSource::empty()));
    }

    let source = viewfinder_upstream::from_config(&config.upstream)
        .context("failed to initialize upstream source")?;
    tracing::info!(base_url = %config.upstream.base_url, "Upstream source initialized");
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Viewfinder v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    viewfinder_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let metadata = viewfinder_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!("Metadata store initialized");

    let upstream = build_upstream(&config)?;

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let state = AppState::new(config, metadata, upstream, Arc::new(NoHiddenContent))
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let cleanup_interval = state.rate_gate_cleanup_interval();
    viewfinder_server::rate_gate::spawn_cleanup_task(state.rate_gate.clone(), cleanup_interval);
    tracing::info!(
        interval_secs = cleanup_interval.as_secs(),
        "Rate gate cleanup task spawned"
    );

    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_without_file_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("absent.toml");

        let config = load_config(missing.to_str().unwrap()).unwrap();
        assert_eq!(config.streaming.max_photos_per_request, 1000);
    }

    #[test]
    fn load_config_reads_toml() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            "[streaming]\nmax_photos_per_request = 42\nlive_enabled = false\n",
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.streaming.max_photos_per_request, 42);
        assert!(!config.streaming.live_enabled);
    }

    #[test]
    fn build_upstream_without_live_needs_no_token() {
        let mut config = AppConfig::for_testing();
        config.streaming.live_enabled = false;
        config.upstream.access_token = None;
        assert!(build_upstream(&config).is_ok());
    }

    #[test]
    fn example_config_loads_and_validates() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/server.example.toml");

        let config = load_config(path).unwrap();
        assert_eq!(config.streaming.min_distribution_score, 0.9);
        assert_eq!(config.streaming.max_photos_per_request, 1000);
        assert!(config.validate().is_ok());
    }
}
