//! HTTP surface tests: the playout feed contract, retrieval validation,
//! and the JSON error envelope.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use farcast_blob::{BlobStore, MemoryBlobStore};
use farcast_core::{Asset, Segment, SegmentState, SlotType, ValidationStatus};
use farcast_kb::{
    EmbeddingApi, EmbeddingConfig, EmbeddingService, KbResult, MemoryKnowledgeStore,
    EMBEDDING_DIM,
};
use farcast_queue::backend::memory::MemoryJobStore;
use farcast_rag::{RetrievalConfig, RetrievalService};
use farcast_station::{router, AppState, MemoryStationStore, PlayoutFeed, StationStore};

struct UnitEmbeddingApi;

#[async_trait::async_trait]
impl EmbeddingApi for UnitEmbeddingApi {
    async fn embed(&self, inputs: &[String]) -> KbResult<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|_| vec![0.5; EMBEDDING_DIM]).collect())
    }
}

async fn app_with_ready_segment() -> (axum::Router, Arc<MemoryStationStore>, String) {
    let store = Arc::new(MemoryStationStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let jobs = Arc::new(MemoryJobStore::new());
    let knowledge = Arc::new(MemoryKnowledgeStore::new());

    // A validated asset with audio in the blob store.
    let mut asset = Asset::new("hash-1", "final/a1.wav");
    asset.validation_status = ValidationStatus::Passed;
    asset.duration_sec = Some(12.5);
    let asset_id = asset.id.clone();
    blob.upload(
        "audio-assets",
        "final/a1.wav",
        bytes::Bytes::from_static(b"RIFF-fake"),
        "audio/wav",
    )
    .await
    .unwrap();
    store.insert_asset(asset).await.unwrap();

    let mut segment = Segment::new(SlotType::News, "en").with_scheduled_start(chrono::Utc::now());
    segment.state = SegmentState::Ready;
    segment.asset_id = Some(asset_id);
    let segment_id = segment.id.to_string();
    store.insert_segment(segment).await.unwrap();

    let embedder = Arc::new(EmbeddingService::new(
        Arc::new(UnitEmbeddingApi),
        EmbeddingConfig::default(),
    ));
    let retrieval = Arc::new(RetrievalService::new(
        knowledge,
        embedder,
        RetrievalConfig::default(),
    ));
    let playout = Arc::new(PlayoutFeed::new(store.clone(), blob));

    let app = router(AppState {
        store: store.clone(),
        jobs,
        retrieval,
        playout,
        tone_min_score: 70,
        heartbeat_interval: Duration::from_secs(30),
    });
    (app, store, segment_id)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn next_serves_signed_urls_without_mutating_state() {
    let (app, store, segment_id) = app_with_ready_segment().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/playout/next?limit=3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let segments = body["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0]["segment_id"], segment_id);
    assert!(segments[0]["audio_url"]
        .as_str()
        .unwrap()
        .contains("final/a1.wav"));

    // Serving the queue never changes state.
    let segment = store
        .get_segment(&segment_id.as_str().into())
        .await
        .unwrap();
    assert_eq!(segment.state, SegmentState::Ready);
}

#[tokio::test]
async fn empty_queue_returns_empty_list() {
    let store = Arc::new(MemoryStationStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let embedder = Arc::new(EmbeddingService::new(
        Arc::new(UnitEmbeddingApi),
        EmbeddingConfig::default(),
    ));
    let app = router(AppState {
        store: store.clone(),
        jobs: Arc::new(MemoryJobStore::new()),
        retrieval: Arc::new(RetrievalService::new(
            Arc::new(MemoryKnowledgeStore::new()),
            embedder,
            RetrievalConfig::default(),
        )),
        playout: Arc::new(PlayoutFeed::new(store, blob)),
        tone_min_score: 70,
        heartbeat_interval: Duration::from_secs(30),
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/playout/next")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["segments"], json!([]));
}

#[tokio::test]
async fn airing_lifecycle_via_http_is_idempotent() {
    let (app, store, segment_id) = app_with_ready_segment().await;

    let now_playing = |app: axum::Router, id: String| async move {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/playout/now-playing")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"segment_id": id, "title": "News"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap()
    };

    // ready -> airing.
    let response = now_playing(app.clone(), segment_id.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "airing");

    // A repeated report is idempotent.
    let response = now_playing(app.clone(), segment_id.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "airing");

    // airing -> aired.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/playout/aired")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"segment_id": segment_id, "aired_at": chrono::Utc::now()}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let segment = store
        .get_segment(&segment_id.as_str().into())
        .await
        .unwrap();
    assert_eq!(segment.state, SegmentState::Aired);
    assert!(segment.aired_at.is_some());

    // Aired segments leave the playout queue.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/playout/next")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["segments"], json!([]));
}

#[tokio::test]
async fn aired_before_airing_conflicts() {
    let (app, _store, segment_id) = app_with_ready_segment().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/playout/aired")
                .header("content-type", "application/json")
                .body(Body::from(json!({"segment_id": segment_id}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("ready -> aired"));
}

#[tokio::test]
async fn empty_rag_query_is_a_bad_request() {
    let (app, _store, _segment_id) = app_with_ready_segment().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rag/retrieve")
                .header("content-type", "application/json")
                .body(Body::from(json!({"text": "  "}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn tone_aggregate_requires_a_date() {
    let (app, store, _segment_id) = app_with_ready_segment().await;

    store
        .record_tone(farcast_station::ToneRecord {
            segment_id: farcast_core::SegmentId::new(),
            slot_type: SlotType::News,
            score: 85,
            recorded_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let today = chrono::Utc::now().date_naive();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/analytics/tone/aggregate?date={today}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["mean_score"], 85.0);
}
