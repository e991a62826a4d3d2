//! HTTP API handlers for CrowdGuard.
//!
//! The read endpoints are the pull-based surface for the rendering layer. Each
//! response is a copy taken from the aggregator at request time; polling
//! cadence is entirely up to the client.
//!
//! `POST /telemetry` is a bridge for transports that can only speak HTTP. The
//! body is handed to the ingest channel as-is; decoding happens later in the
//! ingest task, so a malformed body is still accepted here and dropped there.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

use crate::aggregation::StateAggregator;
use crate::model::{CrowdReading, EventLogEntry, HealthResponse, IngestStats, Snapshot, StateView};
use crate::subscription::{PublishError, TelemetryPublisher};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<StateAggregator>,
    pub publisher: TelemetryPublisher,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/history", get(get_history))
        .route("/events", get(get_events))
        .route("/view", get(get_view))
        .route("/stats", get(get_stats))
        .route("/telemetry", post(post_telemetry))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /snapshot - The live reading.
///
/// # Response
///
/// ```json
/// {
///     "reading": {
///         "count": 120,
///         "status": "DANGER",
///         "gate": "OPEN",
///         "received_at": "2024-05-01T18:30:00Z"
///     },
///     "revision": 42
/// }
/// ```
///
/// Before the first reading this is the OFFLINE sentinel with revision 0.
pub async fn get_snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.aggregator.current_snapshot())
}

/// GET /history - The rolling history, oldest first.
pub async fn get_history(State(state): State<AppState>) -> Json<Vec<CrowdReading>> {
    Json(state.aggregator.history_view())
}

/// GET /events - The surge event log, oldest first.
pub async fn get_events(State(state): State<AppState>) -> Json<Vec<EventLogEntry>> {
    Json(state.aggregator.events_view())
}

/// GET /view - Snapshot, history and events from the same update.
pub async fn get_view(State(state): State<AppState>) -> Json<StateView> {
    Json(state.aggregator.view())
}

/// GET /stats - Ingest counters and uptime.
pub async fn get_stats(State(state): State<AppState>) -> Json<IngestStats> {
    Json(state.aggregator.stats())
}

/// POST /telemetry - Queue one raw payload for ingestion.
///
/// Returns `202 Accepted` once queued, `503 Service Unavailable` if the
/// ingest channel is full or closed. The message is not retried.
#[instrument(skip_all, fields(len = body.len()))]
pub async fn post_telemetry(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match state.publisher.publish(body.to_vec()) {
        Ok(()) => {
            debug!("Telemetry queued");
            StatusCode::ACCEPTED
        }
        Err(PublishError::Full | PublishError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health - Liveness, the current revision, and whether any reading has arrived yet.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.aggregator.current_snapshot();
    Json(HealthResponse {
        status: "ok",
        revision: snapshot.revision,
        awaiting_data: snapshot.is_sentinel(),
    })
}
