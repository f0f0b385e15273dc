//! HTTP server for Viewfinder.
//!
//! This crate provides:
//! - The NDJSON viewport stream, fed by the stream coordinator
//! - Cache statistics and health endpoints
//! - The per-caller rate gate in front of the upstream source
//! - Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod rate_gate;
pub mod routes;
pub mod state;
pub mod stream;

pub use error::ApiError;
pub use rate_gate::RateGate;
pub use routes::create_router;
pub use state::AppState;
pub use stream::{StreamCoordinator, StreamRequest};
