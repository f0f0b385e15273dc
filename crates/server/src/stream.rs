//! Incremental photo stream for one viewport request.
//!
//! A request is produced by a spawned task that pushes [`StreamEvent`]s
//! into a channel with room for a single event. The response body drains
//! the channel, so each `send` only returns once the previous event has been
//! taken by the transport. When the client goes away the receiver is dropped,
//! the next `send` fails and the task stops. Writes already committed stay.
//!
//! Order of work:
//! 1. Emit everything cached in the viewport as one sampled batch.
//! 2. For each uncovered sub-area, page through upstream, storing every
//!    page in full and streaming a slice capped by the per-request limit.
//! 3. Emit `stream_complete`.

use crate::metrics;
use crate::rate_gate::RateGate;
use crate::state::AppState;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;
use viewfinder_core::config::StreamingConfig;
use viewfinder_core::{
    BoundingBox, ContentFilter, HiddenContentSource, Photo, PhotoOrigin, RegionCoverage,
    Sampler, StreamEvent, sort_by_compass_angle, uncovered_sub_areas,
};
use viewfinder_metadata::{MetadataError, MetadataStore, PhotoRow};
use viewfinder_upstream::PhotoSource;

/// Rate gate key for callers that did not identify themselves.
const ANONYMOUS_CALLER: &str = "anonymous";

/// A validated viewport request.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub viewport: BoundingBox,
    pub client_id: Option<String>,
}

impl StreamRequest {
    fn caller_key(&self) -> &str {
        self.client_id.as_deref().unwrap_or(ANONYMOUS_CALLER)
    }
}

/// The receiver went away; stop producing.
#[derive(Debug)]
struct ClientGone;

/// Why work on a sub-area stopped early.
#[derive(Debug)]
enum SubAreaError {
    ClientGone,
    Store(MetadataError),
}

impl From<ClientGone> for SubAreaError {
    fn from(_: ClientGone) -> Self {
        Self::ClientGone
    }
}

impl From<MetadataError> for SubAreaError {
    fn from(e: MetadataError) -> Self {
        Self::Store(e)
    }
}

/// How a sub-area's pagination ended.
#[derive(Debug, PartialEq, Eq)]
enum SubAreaOutcome {
    Completed,
    CapReached,
    Skipped,
}

/// Running counters for one stream.
#[derive(Debug, Default)]
struct Totals {
    cached: u64,
    live: u64,
}

impl Totals {
    fn all(&self) -> u64 {
        self.cached + self.live
    }
}

/// Sender half with the per-request cap bookkeeping.
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    max_photos: usize,
    totals: Totals,
}

impl Emitter {
    async fn send(&self, event: StreamEvent) -> Result<(), ClientGone> {
        self.tx.send(event).await.map_err(|_| ClientGone)
    }

    /// Photos that may still be streamed in this request.
    fn remaining(&self) -> usize {
        self.max_photos.saturating_sub(self.totals.all() as usize)
    }

    async fn error(&self, message: String) -> Result<(), ClientGone> {
        self.send(StreamEvent::Error { message }).await
    }

    /// Filter, cap, sort and emit a live batch.
    async fn live_batch(
        &mut self,
        mut photos: Vec<Photo>,
        filter: &ContentFilter,
        has_next: bool,
    ) -> Result<usize, ClientGone> {
        filter.apply(&mut photos);
        photos.truncate(self.remaining());
        sort_by_compass_angle(&mut photos);

        let count = photos.len();
        self.totals.live += count as u64;
        metrics::record_photos_streamed("live", count);

        self.send(StreamEvent::Photos {
            photos,
            has_next,
            is_complete_coverage: None,
        })
        .await?;
        Ok(count)
    }
}

/// Drives one viewport request from cache lookup to `stream_complete`.
pub struct StreamCoordinator {
    metadata: Arc<dyn MetadataStore>,
    upstream: Arc<dyn PhotoSource>,
    hidden_content: Arc<dyn HiddenContentSource>,
    rate_gate: RateGate,
    config: StreamingConfig,
}

impl StreamCoordinator {
    pub fn new(state: &AppState) -> Self {
        Self {
            metadata: state.metadata.clone(),
            upstream: state.upstream.clone(),
            hidden_content: state.hidden_content.clone(),
            rate_gate: state.rate_gate.clone(),
            config: state.config.streaming.clone(),
        }
    }

    /// Start producing events for `request` on a background task.
    pub fn start(self, request: StreamRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move { self.run(request, tx).await });
        rx
    }

    async fn run(self, request: StreamRequest, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        metrics::STREAM_REQUESTS.inc();
        metrics::ACTIVE_STREAMS.inc();

        tracing::info!(
            client_id = request.caller_key(),
            viewport = %request.viewport,
            cache_enabled = self.config.cache_enabled,
            live_enabled = self.config.live_enabled,
            "Stream started"
        );

        let mut emitter = Emitter {
            tx,
            max_photos: self.config.max_photos_per_request,
            totals: Totals::default(),
        };

        let result = match self.produce(&request, &mut emitter).await {
            Ok(()) => {
                let totals = &emitter.totals;
                emitter
                    .send(StreamEvent::StreamComplete {
                        total_live_photos: totals.live,
                        total_cached_photos: totals.cached,
                        total_all_photos: totals.all(),
                    })
                    .await
            }
            Err(gone) => Err(gone),
        };

        match result {
            Ok(()) => tracing::info!(
                client_id = request.caller_key(),
                cached = emitter.totals.cached,
                live = emitter.totals.live,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stream complete"
            ),
            Err(ClientGone) => {
                metrics::STREAMS_ABORTED.inc();
                tracing::info!(
                    client_id = request.caller_key(),
                    cached = emitter.totals.cached,
                    live = emitter.totals.live,
                    "Client disconnected, stream abandoned"
                );
            }
        }

        metrics::ACTIVE_STREAMS.dec();
        metrics::STREAM_DURATION.observe(started.elapsed().as_secs_f64());
    }

    async fn produce(
        &self,
        request: &StreamRequest,
        emitter: &mut Emitter,
    ) -> Result<(), ClientGone> {
        let filter = self
            .hidden_content
            .filter_for(request.client_id.as_deref(), PhotoOrigin::Upstream)
            .await;

        match (self.config.cache_enabled, self.config.live_enabled) {
            (true, _) => self.stream_with_cache(request, &filter, emitter).await,
            (false, true) => self.stream_live_only(request, &filter, emitter).await,
            (false, false) => {
                tracing::warn!("Both cache and live fetching are disabled, streaming nothing");
                emitter
                    .send(StreamEvent::Photos {
                        photos: Vec::new(),
                        has_next: false,
                        is_complete_coverage: None,
                    })
                    .await
            }
        }
    }

    async fn stream_with_cache(
        &self,
        request: &StreamRequest,
        filter: &ContentFilter,
        emitter: &mut Emitter,
    ) -> Result<(), ClientGone> {
        let viewport = &request.viewport;

        let coverage = match self.load_coverage(viewport).await {
            Ok(coverage) => coverage,
            Err(e) => {
                tracing::error!(viewport = %viewport, error = %e, "Failed to read region coverage");
                emitter
                    .error(format!("failed to read cached coverage: {e}"))
                    .await?;
                Vec::new()
            }
        };
        let uncovered = uncovered_sub_areas(viewport, &coverage);
        let fully_covered = uncovered.is_empty();

        let candidates = match self.metadata.find_photos_in_viewport(viewport, filter).await {
            Ok(rows) => rows.into_iter().map(PhotoRow::into_photo).collect(),
            Err(e) => {
                tracing::error!(viewport = %viewport, error = %e, "Failed to read cached photos");
                emitter
                    .error(format!("failed to read cached photos: {e}"))
                    .await?;
                Vec::new()
            }
        };
        let candidate_count = candidates.len();

        let sampler = Sampler::new(emitter.max_photos);
        let sampled = {
            let mut rng = rand::rng();
            sampler.sample(candidates, viewport, fully_covered, &mut rng)
        };

        let discard_cache = !fully_covered
            && !sampled.photos.is_empty()
            && sampled.distribution_score < self.config.min_distribution_score;

        let sub_areas = if discard_cache {
            tracing::info!(
                viewport = %viewport,
                score = sampled.distribution_score,
                threshold = self.config.min_distribution_score,
                "Cached photos poorly distributed, refetching whole viewport"
            );
            emitter
                .send(StreamEvent::Photos {
                    photos: Vec::new(),
                    has_next: true,
                    is_complete_coverage: Some(false),
                })
                .await?;
            vec![*viewport]
        } else {
            let mut photos = sampled.photos;
            sort_by_compass_angle(&mut photos);
            let emitted = photos.len();
            emitter.totals.cached = emitted as u64;
            metrics::record_photos_streamed("cache", emitted);

            tracing::debug!(
                viewport = %viewport,
                candidates = candidate_count,
                emitted = emitted,
                score = sampled.distribution_score,
                fully_covered = fully_covered,
                "Emitting cached photos"
            );
            emitter
                .send(StreamEvent::Photos {
                    photos,
                    has_next: !fully_covered || candidate_count > emitted,
                    is_complete_coverage: Some(fully_covered),
                })
                .await?;

            uncovered
        };

        if !self.config.live_enabled {
            if !sub_areas.is_empty() {
                tracing::debug!(
                    sub_areas = sub_areas.len(),
                    "Live fetching disabled, leaving uncovered areas unfetched"
                );
            }
            return Ok(());
        }

        tracing::debug!(
            viewport = %viewport,
            sub_areas = sub_areas.len(),
            "Computed uncovered sub-areas"
        );

        for area in sub_areas {
            if emitter.remaining() == 0 {
                tracing::info!(
                    client_id = request.caller_key(),
                    max_photos = emitter.max_photos,
                    "Photo limit reached, skipping remaining sub-areas"
                );
                break;
            }

            match self.fetch_sub_area(request, &area, filter, emitter).await {
                Ok(SubAreaOutcome::CapReached) => break,
                Ok(SubAreaOutcome::Completed | SubAreaOutcome::Skipped) => {}
                Err(SubAreaError::ClientGone) => return Err(ClientGone),
                Err(SubAreaError::Store(e)) => {
                    tracing::error!(area = %area, error = %e, "Failed to stream sub-area");
                    emitter
                        .error(format!("failed to stream region {area}: {e}"))
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn load_coverage(
        &self,
        viewport: &BoundingBox,
    ) -> Result<Vec<RegionCoverage>, MetadataError> {
        let regions = self.metadata.find_intersecting_regions(viewport).await?;
        let coverage = regions
            .iter()
            .filter_map(|region| match region.coverage() {
                Ok(coverage) => Some(coverage),
                Err(e) => {
                    tracing::warn!(region_id = %region.region_id, error = %e, "Ignoring region");
                    None
                }
            })
            .collect();
        Ok(coverage)
    }

    async fn fetch_sub_area(
        &self,
        request: &StreamRequest,
        area: &BoundingBox,
        filter: &ContentFilter,
        emitter: &mut Emitter,
    ) -> Result<SubAreaOutcome, SubAreaError> {
        let region = self.metadata.create_region_if_absent(area).await?;
        let region_id = region.region_id;

        if region.is_complete {
            tracing::debug!(region_id = %region_id, "Region already complete, skipping");
            return Ok(SubAreaOutcome::Skipped);
        }

        let mut cursor = if region.has_more {
            region.last_cursor.clone()
        } else {
            None
        };
        if cursor.is_some() {
            tracing::info!(
                region_id = %region_id,
                cursor = ?cursor,
                "Resuming incomplete region"
            );
        }

        let mut received = 0u64;
        loop {
            let waited = self.rate_gate.wait(request.caller_key()).await;
            metrics::RATE_GATE_WAIT_DURATION.observe(waited.as_secs_f64());

            let page = self.upstream.fetch_page(area, cursor.as_deref()).await;
            metrics::UPSTREAM_REQUESTS
                .with_label_values(&[page.outcome.as_str()])
                .inc();

            if page.is_exhausted() {
                self.complete_region(region_id, cursor.as_deref(), received, emitter)
                    .await?;
                return Ok(SubAreaOutcome::Completed);
            }
            if page.is_empty() {
                tracing::warn!(
                    region_id = %region_id,
                    received = page.received,
                    "No item on upstream page could be decoded, continuing"
                );
            }

            let cached_at = OffsetDateTime::now_utc();
            let rows: Vec<PhotoRow> = page
                .data
                .iter()
                .map(|fetched| {
                    PhotoRow::from_photo(
                        &fetched.photo,
                        region_id,
                        Some(fetched.raw.to_string()),
                        cached_at,
                    )
                })
                .collect();
            let inserted = if rows.is_empty() {
                0
            } else {
                self.metadata.insert_photo_batch(region_id, &rows).await?
            };
            metrics::PHOTOS_CACHED.inc_by(inserted);
            received += rows.len() as u64;

            let next = page.paging.next_cursor().map(str::to_string);
            if let Some(next) = next.as_deref() {
                self.metadata
                    .update_region_cursor(region_id, Some(next))
                    .await?;
            }

            let photos = page.data.into_iter().map(|fetched| fetched.photo).collect();
            let streamed = emitter
                .live_batch(photos, filter, page.paging.has_next)
                .await?;

            tracing::debug!(
                region_id = %region_id,
                received = rows.len(),
                inserted = inserted,
                streamed = streamed,
                remaining = emitter.remaining(),
                "Processed upstream page"
            );

            match next {
                None => {
                    self.complete_region(region_id, cursor.as_deref(), received, emitter)
                        .await?;
                    return Ok(SubAreaOutcome::Completed);
                }
                Some(next) => cursor = Some(next),
            }

            if emitter.remaining() == 0 {
                tracing::info!(
                    region_id = %region_id,
                    cursor = ?cursor,
                    "Photo limit reached, leaving region incomplete"
                );
                return Ok(SubAreaOutcome::CapReached);
            }
        }
    }

    async fn complete_region(
        &self,
        region_id: Uuid,
        cursor: Option<&str>,
        received: u64,
        emitter: &Emitter,
    ) -> Result<(), SubAreaError> {
        self.metadata.mark_region_complete(region_id, cursor).await?;
        metrics::REGIONS_COMPLETED.inc();
        tracing::info!(region_id = %region_id, photos = received, "Region complete");

        emitter
            .send(StreamEvent::RegionComplete {
                region: region_id.to_string(),
                photos_count: received,
            })
            .await?;
        Ok(())
    }

    /// Page through upstream for the whole viewport without touching the store.
    async fn stream_live_only(
        &self,
        request: &StreamRequest,
        filter: &ContentFilter,
        emitter: &mut Emitter,
    ) -> Result<(), ClientGone> {
        let viewport = &request.viewport;
        let mut cursor: Option<String> = None;

        while emitter.remaining() > 0 {
            let waited = self.rate_gate.wait(request.caller_key()).await;
            metrics::RATE_GATE_WAIT_DURATION.observe(waited.as_secs_f64());

            let page = self.upstream.fetch_page(viewport, cursor.as_deref()).await;
            metrics::UPSTREAM_REQUESTS
                .with_label_values(&[page.outcome.as_str()])
                .inc();

            if page.is_exhausted() {
                break;
            }

            let next = page.paging.next_cursor().map(str::to_string);
            let photos = page.data.into_iter().map(|fetched| fetched.photo).collect();
            emitter
                .live_batch(photos, filter, page.paging.has_next)
                .await?;

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(())
    }
}
