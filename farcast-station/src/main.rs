//! Farcast station process: workers + HTTP, wired from the environment.
//!
//! Runs the reaper, the `kb_index` / `segment_make` / `audio_finalize`
//! worker runtimes, and the internal HTTP surface in one process. The
//! default wiring uses the in-memory stores; durable backends plug in
//! behind the same traits via the `postgres` and `s3` features.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use farcast_blob::MemoryBlobStore;
use farcast_core::StationConfig;
use farcast_kb::{
    ChunkerConfig, EmbeddingConfig, EmbeddingService, HttpEmbeddingApi, KbIndexHandler,
    MemoryKnowledgeStore, KB_INDEX_JOB,
};
use farcast_queue::backend::memory::MemoryJobStore;
use farcast_queue::{Reaper, WorkerOptions, WorkerRuntime};
use farcast_rag::{QueryBuilder, QueryTemplates, RetrievalConfig, RetrievalService};
use farcast_script::{GeneratorConfig, HttpCompletionApi, ScriptGenerator, ToneLexicon};
use farcast_station::{
    router, AppState, AudioFinalizeHandler, FfmpegNormalizer, HttpTtsClient, MemoryStationStore,
    PlayoutFeed, SegmentMakeHandler, AUDIO_FINALIZE_JOB, SEGMENT_MAKE_JOB,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StationConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(future_year_offset = config.future_year_offset, "farcast station starting");

    // Stores. The process ships with in-memory backends; production
    // deployments swap these behind the same traits.
    let jobs = Arc::new(MemoryJobStore::new());
    let knowledge = Arc::new(MemoryKnowledgeStore::new());
    let station = Arc::new(MemoryStationStore::new());
    let blob = Arc::new(MemoryBlobStore::new());

    // External service clients.
    let embedder = Arc::new(EmbeddingService::new(
        Arc::new(HttpEmbeddingApi::new(
            "https://api.embeddings.example",
            config.embedding_api_key.clone(),
        )),
        EmbeddingConfig::default(),
    ));
    let retrieval = Arc::new(RetrievalService::new(
        knowledge.clone(),
        embedder.clone(),
        RetrievalConfig::default(),
    ));
    let generator = Arc::new(ScriptGenerator::new(
        Arc::new(HttpCompletionApi::new(
            "https://api.llm.example",
            config.llm_api_key.clone(),
        )),
        GeneratorConfig::default(),
    ));
    let tts = Arc::new(HttpTtsClient::new(config.tts_url.clone()));
    let normalizer = Arc::new(FfmpegNormalizer::new());

    let shutdown = CancellationToken::new();

    // Reaper: the liveness guarantee for crashed workers.
    let reaper = Reaper::new(jobs.clone());
    let reaper_task = tokio::spawn(reaper.run(shutdown.child_token()));

    // Workers.
    let kb_worker = WorkerRuntime::new(
        jobs.clone(),
        WorkerOptions::new(KB_INDEX_JOB, "kb-1")
            .with_max_concurrent_jobs(config.max_concurrent_jobs),
        Arc::new(KbIndexHandler::new(
            knowledge.clone(),
            embedder.clone(),
            ChunkerConfig::default(),
        )),
    )
    .spawn();

    let segment_worker = WorkerRuntime::new(
        jobs.clone(),
        WorkerOptions::new(SEGMENT_MAKE_JOB, "segment-1")
            .with_max_concurrent_jobs(config.max_concurrent_jobs),
        Arc::new(SegmentMakeHandler::new(
            station.clone(),
            jobs.clone(),
            blob.clone(),
            retrieval.clone(),
            QueryBuilder::new(QueryTemplates::embedded(), config.future_year_offset),
            generator,
            tts,
            ToneLexicon::embedded(),
            config.tone_min_acceptable_score,
        )),
    )
    .spawn();

    let mastering_worker = WorkerRuntime::new(
        jobs.clone(),
        WorkerOptions::new(AUDIO_FINALIZE_JOB, "mastering-1")
            .with_max_concurrent_jobs(config.max_concurrent_jobs),
        Arc::new(AudioFinalizeHandler::new(
            station.clone(),
            blob.clone(),
            normalizer,
        )),
    )
    .spawn();

    // HTTP surface.
    let playout = Arc::new(PlayoutFeed::new(station.clone(), blob.clone()));
    let app = router(AppState {
        store: station,
        jobs: jobs.clone(),
        retrieval,
        playout,
        tone_min_score: config.tone_min_acceptable_score,
        heartbeat_interval: std::time::Duration::from_secs(30),
    });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("listening on 0.0.0.0:8080");
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                shutdown.cancel();
            }
        })
        .await?;

    // Drain workers before exit; abandoned jobs go back through the
    // reaper on next start.
    shutdown.cancel();
    segment_worker.shutdown().await?;
    mastering_worker.shutdown().await?;
    kb_worker.shutdown().await?;
    reaper_task.abort();

    info!("farcast station stopped");
    Ok(())
}
