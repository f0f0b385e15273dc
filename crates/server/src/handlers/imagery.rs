//! Imagery endpoints: the viewport stream and cache statistics.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::stream::{StreamCoordinator, StreamRequest};
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use viewfinder_core::BoundingBox;

/// Maximum accepted length of a client id.
const MAX_CLIENT_ID_LEN: usize = 128;

/// Query parameters for the stream endpoint.
///
/// Fields are taken as strings so malformed values produce the usual JSON
/// error body instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub top_left_lat: Option<String>,
    pub top_left_lon: Option<String>,
    pub bottom_right_lat: Option<String>,
    pub bottom_right_lon: Option<String>,
    pub client_id: Option<String>,
}

impl StreamQuery {
    fn into_request(self) -> ApiResult<StreamRequest> {
        let viewport = BoundingBox::from_corners(
            parse_coordinate("top_left_lat", self.top_left_lat)?,
            parse_coordinate("top_left_lon", self.top_left_lon)?,
            parse_coordinate("bottom_right_lat", self.bottom_right_lat)?,
            parse_coordinate("bottom_right_lon", self.bottom_right_lon)?,
        )?;

        let client_id = self
            .client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::BadRequest("client_id is required".to_string()))?;
        if client_id.chars().count() > MAX_CLIENT_ID_LEN {
            return Err(ApiError::BadRequest(format!(
                "client_id exceeds {MAX_CLIENT_ID_LEN} characters"
            )));
        }

        Ok(StreamRequest {
            viewport,
            client_id: Some(client_id),
        })
    }
}

fn parse_coordinate(name: &str, value: Option<String>) -> ApiResult<f64> {
    let value = value.ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))?;
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ApiError::BadRequest(format!("{name} is not a number: {value:?}")))
}

/// GET /v1/imagery/stream - Stream photos for a viewport as NDJSON.
///
/// Cached photos arrive first as one sampled batch, then live pages for the
/// parts of the viewport that are not yet cached. The last line is always
/// `stream_complete` unless the client disconnects first.
pub async fn stream_viewport(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let request = query.into_request()?;
    let rx = StreamCoordinator::new(&state).start(request);

    let lines = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            let event = rx.recv().await?;
            match event.to_ndjson_line() {
                Ok(line) => return Some((Ok::<_, Infallible>(line), rx)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize stream event, dropping it");
                }
            }
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        [("x-accel-buffering", "no")],
        Body::from_stream(lines),
    )
        .into_response())
}

/// Cache statistics response.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheStatsResponse {
    pub total_cached_photos: u64,
    pub total_cached_regions: u64,
    pub complete_cached_regions: u64,
    /// Percentage of regions that are complete.
    pub cache_efficiency: f64,
}

/// GET /v1/imagery/stats - Cache statistics.
pub async fn get_cache_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<CacheStatsResponse>> {
    let stats = state.metadata.stats_snapshot().await?;

    Ok(Json(CacheStatsResponse {
        total_cached_photos: stats.total_photos,
        total_cached_regions: stats.total_regions,
        complete_cached_regions: stats.complete_regions,
        cache_efficiency: stats.efficiency(),
    }))
}
