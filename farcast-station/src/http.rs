//! The station's internal HTTP surface.
//!
//! Minimal JSON REST: retrieval for debugging and internal callers, the
//! playout feed for the stream engine, tone analytics, and worker health.
//! Errors are always `{error, code?, details?}`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use farcast_core::SegmentId;
use farcast_queue::JobStore;
use farcast_rag::{RagError, RagQuery, RetrievalService};

use crate::playout::PlayoutFeed;
use crate::store::StationStore;
use crate::StationError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StationStore>,
    pub jobs: Arc<dyn JobStore>,
    pub retrieval: Arc<RetrievalService>,
    pub playout: Arc<PlayoutFeed>,

    /// Floor for the tone analytics `below_threshold` counter
    pub tone_min_score: u32,

    /// Health staleness window, twice the heartbeat interval
    pub heartbeat_interval: std::time::Duration,
}

/// Error envelope carried by every non-2xx response.
#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = classify(&self.0);
        let body = json!({
            "error": self.0.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

/// Map domain errors onto HTTP statuses and stable codes.
fn classify(err: &anyhow::Error) -> (StatusCode, Option<String>) {
    if let Some(rag) = err.downcast_ref::<RagError>() {
        let status = match rag {
            RagError::EmptyQuery => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return (status, rag.semantic_code().map(|c| c.to_string()));
    }
    if let Some(station) = err.downcast_ref::<StationError>() {
        let status = match station {
            StationError::SegmentNotFound(_) | StationError::AssetNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StationError::IllegalTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return (status, station.semantic_code().map(|c| c.to_string()));
    }
    (StatusCode::INTERNAL_SERVER_ERROR, None)
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rag/retrieve", post(rag_retrieve))
        .route("/playout/next", get(playout_next))
        .route("/playout/now-playing", post(playout_now_playing))
        .route("/playout/aired", post(playout_aired))
        .route("/analytics/tone/aggregate", post(tone_aggregate))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn rag_retrieve(
    State(state): State<AppState>,
    Json(query): Json<RagQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let retrieval = state.retrieval.retrieve(&query).await?;
    Ok(Json(retrieval))
}

#[derive(Deserialize)]
struct NextParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    5
}

#[derive(Serialize)]
struct NextResponse {
    segments: Vec<crate::playout::PlayoutItem>,
}

async fn playout_next(
    State(state): State<AppState>,
    Query(params): Query<NextParams>,
) -> Result<impl IntoResponse, ApiError> {
    let segments = state.playout.next(params.limit.min(50)).await?;
    Ok(Json(NextResponse { segments }))
}

#[derive(Deserialize)]
struct NowPlayingRequest {
    segment_id: SegmentId,
    #[allow(dead_code)]
    #[serde(default)]
    title: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SegmentStateResponse {
    segment_id: SegmentId,
    state: String,
}

async fn playout_now_playing(
    State(state): State<AppState>,
    Json(request): Json<NowPlayingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let segment = state.playout.now_playing(&request.segment_id).await?;
    Ok(Json(SegmentStateResponse {
        segment_id: segment.id,
        state: segment.state.to_string(),
    }))
}

#[derive(Deserialize)]
struct AiredRequest {
    segment_id: SegmentId,
    #[serde(default = "Utc::now")]
    aired_at: DateTime<Utc>,
}

async fn playout_aired(
    State(state): State<AppState>,
    Json(request): Json<AiredRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let segment = state
        .playout
        .aired(&request.segment_id, request.aired_at)
        .await?;
    Ok(Json(SegmentStateResponse {
        segment_id: segment.id,
        state: segment.state.to_string(),
    }))
}

#[derive(Deserialize)]
struct ToneParams {
    date: NaiveDate,
}

async fn tone_aggregate(
    State(state): State<AppState>,
    Query(params): Query<ToneParams>,
) -> Result<impl IntoResponse, ApiError> {
    let aggregate = state
        .store
        .tone_aggregate(params.date, state.tone_min_score)
        .await?;
    Ok(Json(aggregate))
}

#[derive(Serialize)]
struct HealthEntry {
    worker_type: String,
    instance_id: String,
    status: String,
    jobs_in_flight: usize,
    uptime_sec: u64,
    healthy: bool,
}

async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let workers: Vec<HealthEntry> = state
        .jobs
        .list_health()
        .await
        .map_err(StationError::Queue)?
        .into_iter()
        .map(|check| HealthEntry {
            healthy: check.is_healthy(state.heartbeat_interval, now),
            worker_type: check.worker_type,
            instance_id: check.instance_id,
            status: check.status,
            jobs_in_flight: check.jobs_in_flight,
            uptime_sec: check.uptime_sec,
        })
        .collect();
    Ok(Json(json!({ "workers": workers })))
}
