//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/imagery/stream", get(handlers::stream_viewport))
        .route("/v1/imagery/stats", get(handlers::get_cache_stats));

    let mut router = Router::new().merge(api_routes);

    // When enabled, restrict this endpoint to scraper IPs at the network level.
    // See crate::metrics module documentation for details.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
