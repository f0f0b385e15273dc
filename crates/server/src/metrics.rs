//! Prometheus metrics for the Viewfinder server.
//!
//! Exposes counters for upstream traffic, cache writes and streamed photos,
//! plus stream latency.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no client ids or coordinates, only aggregate usage.
//! Restrict the endpoint to scraper IPs at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upstream metrics
pub static UPSTREAM_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "viewfinder_upstream_requests_total",
            "Upstream page requests by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static RATE_GATE_WAIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "viewfinder_rate_gate_wait_seconds",
            "Time spent waiting on the per-caller rate gate",
        )
        .buckets(vec![0.0, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("metric creation failed")
});

// Cache metrics
pub static PHOTOS_CACHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "viewfinder_photos_cached_total",
        "Photos newly written to the spatial store",
    )
    .expect("metric creation failed")
});

pub static REGIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "viewfinder_regions_completed_total",
        "Regions whose upstream pagination finished",
    )
    .expect("metric creation failed")
});

// Stream metrics
pub static STREAM_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "viewfinder_stream_requests_total",
        "Viewport stream requests accepted",
    )
    .expect("metric creation failed")
});

pub static PHOTOS_STREAMED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "viewfinder_photos_streamed_total",
            "Photos sent to clients by source",
        ),
        &["source"],
    )
    .expect("metric creation failed")
});

pub static STREAMS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "viewfinder_streams_aborted_total",
        "Streams stopped early because the client went away",
    )
    .expect("metric creation failed")
});

pub static ACTIVE_STREAMS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "viewfinder_active_streams",
        "Streams currently being produced",
    )
    .expect("metric creation failed")
});

pub static STREAM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "viewfinder_stream_duration_seconds",
            "Time from request to stream_complete",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPSTREAM_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RATE_GATE_WAIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PHOTOS_CACHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REGIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STREAM_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PHOTOS_STREAMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STREAMS_ABORTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_STREAMS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STREAM_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the /metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count streamed photos for `source` ("cache" or "live").
pub fn record_photos_streamed(source: &str, count: usize) {
    PHOTOS_STREAMED
        .with_label_values(&[source])
        .inc_by(count as u64);
}
