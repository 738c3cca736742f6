//! End-to-end pipeline scenarios over the in-memory backends:
//! `kb_index → segment_make → audio_finalize → ready → airing → aired`,
//! TTS retry/backoff, and content-hash dedupe.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use farcast_blob::MemoryBlobStore;
use farcast_core::{
    Segment, SegmentId, SegmentState, SlotType, SourceDoc, SourceId, SourceType, ValidationStatus,
};
use farcast_kb::{
    ChunkerConfig, EmbeddingApi, EmbeddingConfig, EmbeddingService, KbIndexHandler, KbIndexJob,
    KbResult, KnowledgeStore, MemoryKnowledgeStore, EMBEDDING_DIM, KB_INDEX_JOB,
};
use farcast_queue::backend::memory::MemoryJobStore;
use farcast_queue::{JobId, JobState, JobStore, NewJob, WorkerHandle, WorkerOptions, WorkerRuntime};
use farcast_rag::{QueryBuilder, QueryTemplates, RetrievalConfig, RetrievalService};
use farcast_script::{
    CompletionApi, CompletionRequest, CompletionResponse, GeneratorConfig, ScriptGenerator,
    ScriptResult, ToneLexicon,
};
use farcast_station::audio::sine_wav;
use farcast_station::normalize::{LoudnessReport, LoudnessTarget, Normalizer};
use farcast_station::{
    AudioFinalizeHandler, MemoryStationStore, SegmentMakeHandler, StationResult, StationStore,
    SynthesizedAudio, TtsClient, AUDIO_FINALIZE_JOB, SEGMENT_MAKE_JOB,
};

// ── Test doubles ────────────────────────────────────────────────────

struct UnitEmbeddingApi;

#[async_trait]
impl EmbeddingApi for UnitEmbeddingApi {
    async fn embed(&self, inputs: &[String]) -> KbResult<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|_| {
                let mut v = vec![0.0f32; EMBEDDING_DIM];
                v[0] = 1.0;
                v
            })
            .collect())
    }
}

struct NewsScriptApi;

#[async_trait]
impl CompletionApi for NewsScriptApi {
    async fn complete(&self, _request: &CompletionRequest) -> ScriptResult<CompletionResponse> {
        let mut text = String::from(
            "Good evening, settlers, this is your news update from the relay. \
             Mars Colony marked its fiftieth anniversary this week \
             [SOURCE: universe_doc:doc-mars-50] with festivities in every dome. ",
        );
        text.push_str(&"The ferries run on time and the harvest domes report well. ".repeat(17));
        Ok(CompletionResponse {
            text,
            input_tokens: 900,
            output_tokens: 260,
            stop_reason: Some("end_turn".to_string()),
        })
    }
}

/// TTS double returning a fixed WAV, optionally failing the first N calls
/// with an HTTP status.
struct FlakyTts {
    fail_first: usize,
    fail_status: u16,
    calls: AtomicUsize,
}

impl FlakyTts {
    fn reliable() -> Self {
        Self {
            fail_first: 0,
            fail_status: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(fail_first: usize, fail_status: u16) -> Self {
        Self {
            fail_first,
            fail_status,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TtsClient for FlakyTts {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_id: &str,
        _speed: f32,
        _use_cache: bool,
    ) -> StationResult<SynthesizedAudio> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(farcast_station::StationError::Tts {
                status: Some(self.fail_status),
                message: "synthesized outage".to_string(),
            });
        }
        let wav = sine_wav(Duration::from_secs(2), 24_000, 440.0);
        Ok(SynthesizedAudio {
            duration_sec: 2.0,
            cached: false,
            wav,
        })
    }
}

/// Normalizer double: copies input to output and reports fixed metrics.
struct FixedNormalizer {
    lufs: f64,
    peak: f64,
}

impl FixedNormalizer {
    fn passing() -> Self {
        Self { lufs: -16.2, peak: -1.5 }
    }

    fn failing() -> Self {
        Self { lufs: -10.0, peak: -0.1 }
    }
}

#[async_trait]
impl Normalizer for FixedNormalizer {
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        _target: &LoudnessTarget,
    ) -> StationResult<LoudnessReport> {
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| farcast_station::StationError::Normalizer(e.to_string()))?;
        let bytes = tokio::fs::read(output)
            .await
            .map_err(|e| farcast_station::StationError::Normalizer(e.to_string()))?;
        Ok(LoudnessReport {
            lufs_integrated: self.lufs,
            peak_db: self.peak,
            duration_sec: farcast_station::audio::wav_duration_sec(&bytes)?,
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Station {
    jobs: Arc<MemoryJobStore>,
    knowledge: Arc<MemoryKnowledgeStore>,
    store: Arc<MemoryStationStore>,
    blob: Arc<MemoryBlobStore>,
    workers: Vec<WorkerHandle>,
}

impl Station {
    fn spawn(tts: Arc<dyn TtsClient>, normalizer: Arc<dyn Normalizer>) -> Self {
        let jobs = Arc::new(MemoryJobStore::new());
        let knowledge = Arc::new(MemoryKnowledgeStore::new());
        let store = Arc::new(MemoryStationStore::new());
        let blob = Arc::new(MemoryBlobStore::new());

        let embedder = Arc::new(EmbeddingService::new(
            Arc::new(UnitEmbeddingApi),
            EmbeddingConfig {
                inter_batch_delay: Duration::from_millis(1),
                ..EmbeddingConfig::default()
            },
        ));
        let retrieval = Arc::new(RetrievalService::new(
            knowledge.clone(),
            embedder.clone(),
            RetrievalConfig::default(),
        ));
        let generator = Arc::new(ScriptGenerator::new(
            Arc::new(NewsScriptApi),
            GeneratorConfig {
                retry_base_delay: Duration::from_millis(5),
                ..GeneratorConfig::default()
            },
        ));

        let options = |worker_type: &str, instance: &str| {
            WorkerOptions::new(worker_type, instance)
                .with_poll_interval(Duration::from_millis(20))
                .with_heartbeat_interval(Duration::from_millis(100))
                .with_drain_deadline(Duration::from_secs(2))
        };

        let workers = vec![
            WorkerRuntime::new(
                jobs.clone(),
                options(KB_INDEX_JOB, "kb-1"),
                Arc::new(KbIndexHandler::new(
                    knowledge.clone(),
                    embedder,
                    ChunkerConfig::default(),
                )),
            )
            .spawn(),
            WorkerRuntime::new(
                jobs.clone(),
                options(SEGMENT_MAKE_JOB, "segment-1"),
                Arc::new(SegmentMakeHandler::new(
                    store.clone(),
                    jobs.clone(),
                    blob.clone(),
                    retrieval,
                    QueryBuilder::new(QueryTemplates::embedded(), 500),
                    generator,
                    tts,
                    ToneLexicon::embedded(),
                    70,
                )),
            )
            .spawn(),
            WorkerRuntime::new(
                jobs.clone(),
                options(AUDIO_FINALIZE_JOB, "mastering-1"),
                Arc::new(AudioFinalizeHandler::new(
                    store.clone(),
                    blob.clone(),
                    normalizer,
                )),
            )
            .spawn(),
        ];

        Self {
            jobs,
            knowledge,
            store,
            blob,
            workers,
        }
    }

    async fn seed_knowledge(&self) {
        let body = "Mars Colony celebrated its fiftieth anniversary with a week \
                    of festivities across every dome and relay outpost today. "
            .repeat(20);
        self.knowledge
            .put_source(SourceDoc {
                id: SourceId::from("doc-mars-50"),
                source_type: SourceType::UniverseDoc,
                title: "Mars Colony at Fifty".to_string(),
                body_md: body,
                lang: Some("en".to_string()),
                published_at: None,
                event_date: None,
            })
            .await
            .unwrap();

        let job_id = self
            .jobs
            .enqueue(
                NewJob::json(
                    KB_INDEX_JOB,
                    &KbIndexJob {
                        source_id: SourceId::from("doc-mars-50"),
                        source_type: SourceType::UniverseDoc,
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();
        self.wait_job(&job_id, JobState::Completed).await;
    }

    async fn submit_segment(&self, max_attempts: u32) -> (SegmentId, JobId) {
        self.submit_segment_with(max_attempts, None).await
    }

    async fn submit_segment_with(
        &self,
        max_attempts: u32,
        idempotency_key: Option<&str>,
    ) -> (SegmentId, JobId) {
        let mut segment =
            Segment::new(SlotType::News, "en").with_scheduled_start(chrono::Utc::now());
        if let Some(key) = idempotency_key {
            segment = segment.with_idempotency_key(key);
        }
        let segment_id = segment.id.clone();
        self.store.insert_segment(segment).await.unwrap();

        let job_id = self
            .jobs
            .enqueue(
                NewJob::json(SEGMENT_MAKE_JOB, &farcast_station::SegmentMakeJob {
                    segment_id: segment_id.clone(),
                })
                .unwrap()
                .with_max_attempts(max_attempts),
            )
            .await
            .unwrap();
        (segment_id, job_id)
    }

    async fn wait_job(&self, job_id: &JobId, state: JobState) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let record = self.jobs.get(job_id).await.unwrap();
            if record.state == state {
                return;
            }
            // Collapse retry backoff windows so tests stay fast.
            if record.state == JobState::Pending && record.attempts > 0 {
                self.jobs.force_due(job_id);
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} never reached {state}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_segment(&self, segment_id: &SegmentId, state: SegmentState) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let segment = self.store.get_segment(segment_id).await.unwrap();
            if segment.state == state {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "segment {segment_id} stuck in {}, wanted {state}",
                segment.state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Keep collapsing backoff windows for a job until the segment
    /// reaches the wanted state (or the deadline trips).
    async fn wait_segment_collapsing(&self, segment_id: &SegmentId, job_id: &JobId, state: SegmentState) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let segment = self.store.get_segment(segment_id).await.unwrap();
            if segment.state == state {
                return;
            }
            let record = self.jobs.get(job_id).await.unwrap();
            if record.state == JobState::Pending && record.attempts > 0 {
                self.jobs.force_due(job_id);
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "segment {segment_id} stuck in {}, wanted {state}",
                segment.state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown().await.unwrap();
        }
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_reaches_ready_with_validated_asset() {
    let station = Station::spawn(
        Arc::new(FlakyTts::reliable()),
        Arc::new(FixedNormalizer::passing()),
    );
    station.seed_knowledge().await;

    // Indexing produced embedded chunks.
    let chunks = station
        .knowledge
        .chunks_for_source(SourceType::UniverseDoc, &SourceId::from("doc-mars-50"))
        .await
        .unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.lang == "en"));

    let (segment_id, job_id) = station.submit_segment(3).await;
    station.wait_segment(&segment_id, SegmentState::Ready).await;
    station.wait_job(&job_id, JobState::Completed).await;

    let segment = station.store.get_segment(&segment_id).await.unwrap();
    assert!(segment.script_md.as_deref().unwrap().contains("[SOURCE: universe_doc:doc-mars-50]"));
    assert!(!segment.citations.is_empty());
    assert!(segment.duration_sec.unwrap() > 0.0);

    let asset = station
        .store
        .get_asset(segment.asset_id.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(asset.validation_status, ValidationStatus::Passed);
    assert!(asset.storage_path.starts_with("final/"));
    assert!(asset.lufs_integrated.is_some());

    // The raw object was reclaimed; exactly one final object exists.
    assert!(station.blob.keys_with_prefix("audio-assets", "raw/").is_empty());
    assert_eq!(station.blob.keys_with_prefix("audio-assets", "final/").len(), 1);

    station.shutdown().await;
}

#[tokio::test]
async fn tts_outage_retries_to_success_within_budget() {
    // Two 503s, then success; three attempts available.
    let tts = Arc::new(FlakyTts::failing(2, 503));
    let station = Station::spawn(tts.clone(), Arc::new(FixedNormalizer::passing()));
    station.seed_knowledge().await;

    let (segment_id, job_id) = station.submit_segment(3).await;
    station
        .wait_segment_collapsing(&segment_id, &job_id, SegmentState::Ready)
        .await;

    let record = station.jobs.get(&job_id).await.unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(tts.calls.load(Ordering::SeqCst), 3);
    assert!(station.jobs.dead_letters().await.unwrap().is_empty());

    station.shutdown().await;
}

#[tokio::test]
async fn tts_outage_exhausts_budget_and_dead_letters() {
    // Two 503s but only two attempts: the job must dead-letter and the
    // segment must be marked failed on the final attempt.
    let tts = Arc::new(FlakyTts::failing(2, 503));
    let station = Station::spawn(tts, Arc::new(FixedNormalizer::passing()));
    station.seed_knowledge().await;

    let (segment_id, job_id) = station.submit_segment(2).await;
    station
        .wait_segment_collapsing(&segment_id, &job_id, SegmentState::Failed)
        .await;
    station.wait_job(&job_id, JobState::Failed).await;

    let letters = station.jobs.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts_made, 2);

    let segment = station.store.get_segment(&segment_id).await.unwrap();
    assert!(segment.last_error.as_deref().unwrap().contains("503"));

    station.shutdown().await;
}

#[tokio::test]
async fn identical_audio_dedupes_to_one_final_upload() {
    let station = Station::spawn(
        Arc::new(FlakyTts::reliable()),
        Arc::new(FixedNormalizer::passing()),
    );
    station.seed_knowledge().await;

    let (first_id, first_job) = station.submit_segment(3).await;
    station.wait_segment(&first_id, SegmentState::Ready).await;
    station.wait_job(&first_job, JobState::Completed).await;

    let (second_id, second_job) = station.submit_segment(3).await;
    station.wait_segment(&second_id, SegmentState::Ready).await;
    station.wait_job(&second_job, JobState::Completed).await;

    let first = station.store.get_segment(&first_id).await.unwrap();
    let second = station.store.get_segment(&second_id).await.unwrap();

    // Same synthesized audio, same hash: the second segment rebinds to
    // the first validated asset and nothing new lands under final/.
    assert_eq!(first.asset_id, second.asset_id);
    assert_eq!(station.blob.keys_with_prefix("audio-assets", "final/").len(), 1);
    assert!(station.blob.keys_with_prefix("audio-assets", "raw/").is_empty());

    station.shutdown().await;
}

#[tokio::test]
async fn idempotency_key_reuses_script_and_asset_without_regenerating() {
    let tts = Arc::new(FlakyTts::reliable());
    let station = Station::spawn(tts.clone(), Arc::new(FixedNormalizer::passing()));
    station.seed_knowledge().await;

    // First run with the scheduler's key does the full pipeline.
    let (first_id, first_job) = station.submit_segment_with(3, Some("sched-2526-074")).await;
    station.wait_segment(&first_id, SegmentState::Ready).await;
    station.wait_job(&first_job, JobState::Completed).await;
    assert_eq!(tts.calls.load(Ordering::SeqCst), 1);

    // A retried creation from the external scheduler carries the same
    // key: the new segment reuses the persisted script and validated
    // asset instead of regenerating.
    let (second_id, second_job) = station.submit_segment_with(3, Some("sched-2526-074")).await;
    station.wait_segment(&second_id, SegmentState::Ready).await;
    station.wait_job(&second_job, JobState::Completed).await;

    let first = station.store.get_segment(&first_id).await.unwrap();
    let second = station.store.get_segment(&second_id).await.unwrap();
    assert_eq!(first.script_md, second.script_md);
    assert_eq!(first.citations, second.citations);
    assert_eq!(first.asset_id, second.asset_id);
    assert!(second.duration_sec.unwrap() > 0.0);

    // No second synthesis, no second upload: the reused asset is served
    // as-is.
    assert_eq!(tts.calls.load(Ordering::SeqCst), 1);
    assert_eq!(station.blob.keys_with_prefix("audio-assets", "final/").len(), 1);
    assert!(station.blob.keys_with_prefix("audio-assets", "raw/").is_empty());

    station.shutdown().await;
}

#[tokio::test]
async fn quality_failure_marks_asset_and_segment_failed() {
    let station = Station::spawn(
        Arc::new(FlakyTts::reliable()),
        Arc::new(FixedNormalizer::failing()),
    );
    station.seed_knowledge().await;

    let (segment_id, job_id) = station.submit_segment(1).await;
    station
        .wait_segment_collapsing(&segment_id, &job_id, SegmentState::Failed)
        .await;

    let segment = station.store.get_segment(&segment_id).await.unwrap();
    let asset = station
        .store
        .get_asset(segment.asset_id.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(asset.validation_status, ValidationStatus::Failed);
    assert!(!asset.validation_errors.is_empty());
    // Failing audio is still uploaded for audit.
    assert!(station
        .blob
        .contains("audio-assets", &asset.storage_path));

    station.shutdown().await;
}
