//! The `segment_make` job handler (segment orchestrator).
//!
//! Walks a segment through `queued → retrieving → generating → rendering
//! → normalizing`, then enqueues `audio_finalize` for mastering. Jobs are
//! delivered at least once, so the walk resumes from the segment's
//! persisted state: a re-delivered job reuses the stored script and bound
//! asset rather than regenerating them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use farcast_blob::{raw_audio_key, BlobStore, AUDIO_BUCKET};
use farcast_core::{Asset, Segment, SegmentId, SegmentState, SlotType};
use farcast_queue::{JobError, JobHandler, JobRecord, JobStore, NewJob};
use farcast_rag::{QueryBuilder, RagQuery, RagRetrieval, RetrievalService};
use farcast_script::{
    parse_dialogue, ConversationFormat, ConversationRequest, DjPersona, ScriptContext,
    ScriptGenerator, ToneLexicon,
};

use crate::audio::{self, INTER_TURN_SILENCE};
use crate::mastering::{AudioFinalizeJob, AUDIO_FINALIZE_JOB};
use crate::store::{StationStore, ToneRecord};
use crate::{StationError, StationResult};

/// Job type consumed by the segment worker.
pub const SEGMENT_MAKE_JOB: &str = "segment_make";

/// Payload of a `segment_make` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMakeJob {
    pub segment_id: SegmentId,
}

/// Segment orchestrator dependencies.
pub struct SegmentMakeHandler {
    store: Arc<dyn StationStore>,
    jobs: Arc<dyn JobStore>,
    blob: Arc<dyn BlobStore>,
    retrieval: Arc<RetrievalService>,
    query_builder: QueryBuilder,
    generator: Arc<ScriptGenerator>,
    tts: Arc<dyn crate::TtsClient>,
    tone: ToneLexicon,
    tone_min_score: u32,

    /// Personas per slot; slots not listed use the station default.
    personas: HashMap<SlotType, DjPersona>,
}

impl SegmentMakeHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StationStore>,
        jobs: Arc<dyn JobStore>,
        blob: Arc<dyn BlobStore>,
        retrieval: Arc<RetrievalService>,
        query_builder: QueryBuilder,
        generator: Arc<ScriptGenerator>,
        tts: Arc<dyn crate::TtsClient>,
        tone: ToneLexicon,
        tone_min_score: u32,
    ) -> Self {
        Self {
            store,
            jobs,
            blob,
            retrieval,
            query_builder,
            generator,
            tts,
            tone,
            tone_min_score,
            personas: HashMap::new(),
        }
    }

    /// Assign a persona to a slot type.
    pub fn with_persona(mut self, slot: SlotType, persona: DjPersona) -> Self {
        self.personas.insert(slot, persona);
        self
    }

    fn persona_for(&self, slot: SlotType) -> DjPersona {
        self.personas
            .get(&slot)
            .cloned()
            .unwrap_or_else(DjPersona::station_default)
    }

    #[instrument(skip_all, fields(segment_id = %segment_id))]
    async fn make(
        &self,
        segment_id: &SegmentId,
        cancel: &CancellationToken,
    ) -> StationResult<()> {
        let mut segment = self.store.get_segment(segment_id).await?;

        match segment.state {
            SegmentState::Queued => {
                segment = self
                    .store
                    .transition_segment(segment_id, SegmentState::Retrieving)
                    .await?;
            }
            // Re-delivered job: resume from the persisted state.
            SegmentState::Retrieving
            | SegmentState::Generating
            | SegmentState::Rendering
            | SegmentState::Normalizing => {
                info!(state = %segment.state, "resuming segment pipeline");
            }
            // A prior delivery already finished the walk.
            SegmentState::Ready
            | SegmentState::Airing
            | SegmentState::Aired
            | SegmentState::Archived => return Ok(()),
            SegmentState::Failed => {
                return Err(StationError::SegmentFailed(
                    segment_id.to_string(),
                    segment.state.to_string(),
                ));
            }
        }

        // Retry-safe reuse: an earlier successful run with the same
        // idempotency key supplies its script and validated asset.
        if let Some(key) = segment.idempotency_key.clone() {
            if segment.script_md.is_none() || segment.asset_id.is_none() {
                segment = self.reuse_prior_run(segment, &key).await?;
            }
        }

        if segment.script_md.is_none() {
            segment = self.retrieve_and_generate(segment, cancel).await?;
        }

        if segment.asset_id.is_none() {
            segment = self.render(segment, cancel).await?;
        }

        segment = self.advance_to(segment, SegmentState::Normalizing).await?;

        let asset_id = segment
            .asset_id
            .clone()
            .ok_or_else(|| StationError::MissingAsset(segment.id.to_string()))?;

        // A reused asset already went through mastering; the segment goes
        // straight to ready without another finalize pass.
        if self.store.get_asset(&asset_id).await?.is_playable() {
            self.advance_to(segment, SegmentState::Ready).await?;
            info!("segment ready from reused asset");
            return Ok(());
        }

        self.jobs
            .enqueue(
                NewJob::json(
                    AUDIO_FINALIZE_JOB,
                    &AudioFinalizeJob {
                        segment_id: segment.id.clone(),
                        asset_id,
                        content_type: "speech".to_string(),
                    },
                )
                .map_err(StationError::Queue)?,
            )
            .await?;

        info!("segment handed off to mastering");
        Ok(())
    }

    /// Walk the segment forward one legal edge at a time until it reaches
    /// `target`.
    async fn advance_to(
        &self,
        mut segment: Segment,
        target: SegmentState,
    ) -> StationResult<Segment> {
        while segment.state != target {
            let next = match segment.state {
                SegmentState::Retrieving => SegmentState::Generating,
                SegmentState::Generating => SegmentState::Rendering,
                SegmentState::Rendering => SegmentState::Normalizing,
                SegmentState::Normalizing => SegmentState::Ready,
                other => {
                    return Err(StationError::IllegalTransition {
                        from: other.to_string(),
                        to: target.to_string(),
                    });
                }
            };
            segment = self.store.transition_segment(&segment.id, next).await?;
        }
        Ok(segment)
    }

    /// Copy the persisted script (and validated asset, when one exists)
    /// from an earlier run that carried the same idempotency key.
    async fn reuse_prior_run(&self, mut segment: Segment, key: &str) -> StationResult<Segment> {
        let Some(donor) = self
            .store
            .find_segment_by_idempotency_key(key, &segment.id)
            .await?
        else {
            return Ok(segment);
        };
        let Some(script_md) = donor.script_md.clone() else {
            return Ok(segment);
        };

        if segment.script_md.is_none() {
            self.store
                .set_segment_script(&segment.id, &script_md, &donor.citations)
                .await?;
            segment.script_md = Some(script_md);
            segment.citations = donor.citations.clone();
            info!(donor = %donor.id, "reused script via idempotency key");
        }

        if segment.asset_id.is_none() {
            if let Some(asset_id) = donor.asset_id.clone() {
                let asset = self.store.get_asset(&asset_id).await?;
                if asset.is_playable() {
                    let duration = donor.duration_sec.or(asset.duration_sec);
                    self.store
                        .bind_segment_asset(&segment.id, &asset_id, duration)
                        .await?;
                    segment.asset_id = Some(asset_id);
                    segment.duration_sec = duration;
                    info!(donor = %donor.id, "reused validated asset via idempotency key");
                }
            }
        }

        Ok(segment)
    }

    /// Steps 2–3: retrieval and script generation.
    async fn retrieve_and_generate(
        &self,
        mut segment: Segment,
        cancel: &CancellationToken,
    ) -> StationResult<Segment> {
        let reference_time = self.query_builder.reference_time(&segment);
        let query_text = self.query_builder.build(&segment);

        let retrieval = self
            .retrieval
            .retrieve(&RagQuery {
                recency_boost: true,
                reference_time: Some(reference_time),
                ..RagQuery::text(query_text)
            })
            .await?;

        if retrieval.chunks.is_empty() && segment.slot_type.requires_grounding() {
            return Err(StationError::Ungrounded(segment.slot_type.to_string()));
        }

        if cancel.is_cancelled() {
            return Err(StationError::Storage("segment make cancelled".to_string()));
        }

        if segment.state == SegmentState::Retrieving {
            segment = self
                .store
                .transition_segment(&segment.id, SegmentState::Generating)
                .await?;
        }

        let (script_md, citations) = self.write_script(&segment, &retrieval, reference_time).await?;

        self.store
            .set_segment_script(&segment.id, &script_md, &citations)
            .await?;
        segment.script_md = Some(script_md.clone());
        segment.citations = citations;

        // Tone validation is editorial telemetry, not a gate: low scores
        // are recorded and flagged for review.
        let report = self.tone.validate(&script_md);
        if !report.is_acceptable(self.tone_min_score) {
            warn!(score = report.score, hits = report.hits.len(), "script tone below threshold");
        }
        self.store
            .record_tone(ToneRecord {
                segment_id: segment.id.clone(),
                slot_type: segment.slot_type,
                score: report.score,
                recorded_at: chrono::Utc::now(),
            })
            .await?;

        Ok(segment)
    }

    async fn write_script(
        &self,
        segment: &Segment,
        retrieval: &RagRetrieval,
        reference_time: chrono::DateTime<chrono::Utc>,
    ) -> StationResult<(String, Vec<farcast_core::Citation>)> {
        use chrono::Datelike;
        let persona = self.persona_for(segment.slot_type);

        if segment.slot_type.is_conversation() {
            let format = match segment.slot_type {
                SlotType::Interview => ConversationFormat::Interview,
                SlotType::Panel => ConversationFormat::Panel,
                _ => ConversationFormat::Dialogue,
            };
            let conversation = self
                .generator
                .generate_conversation(&ConversationRequest {
                    format,
                    host: persona,
                    participants: vec![DjPersona {
                        name: "Guest".to_string(),
                        bio: "Tonight's guest".to_string(),
                        traits: vec!["thoughtful".to_string()],
                        voice_id: "guest-1".to_string(),
                    }],
                    topic: self.query_builder.build(segment),
                    retrieved_context: retrieval.chunks.clone(),
                    duration_sec: 240,
                    tone: "warm".to_string(),
                    future_year: reference_time.year(),
                })
                .await?;
            let citations =
                farcast_script::generate::extract_citations(&conversation.raw, &retrieval.chunks);
            Ok((conversation.raw, citations))
        } else {
            let script = self
                .generator
                .generate(&ScriptContext {
                    dj: persona,
                    slot_type: segment.slot_type,
                    chunks: retrieval.chunks.clone(),
                    reference_time,
                    future_year: reference_time.year(),
                    program_name: None,
                    previous_summary: None,
                    lang: segment.lang.clone(),
                })
                .await?;
            Ok((script.text, script.citations))
        }
    }

    /// Step 4: synthesize, upload raw audio, create and bind the asset.
    async fn render(
        &self,
        mut segment: Segment,
        cancel: &CancellationToken,
    ) -> StationResult<Segment> {
        // The segment may still be in `retrieving` when a reused script
        // skipped the generation step entirely.
        segment = self.advance_to(segment, SegmentState::Rendering).await?;

        let script = segment
            .script_md
            .clone()
            .ok_or_else(|| StationError::Storage("render without script".to_string()))?;
        let persona = self.persona_for(segment.slot_type);

        let (wav, duration_sec) = if segment.slot_type.is_conversation() {
            let turns = parse_dialogue(&script);
            let host_label = persona.name.to_uppercase();
            let mut rendered: Vec<Bytes> = Vec::with_capacity(turns.len());
            for turn in &turns {
                if cancel.is_cancelled() {
                    return Err(StationError::Storage("segment make cancelled".to_string()));
                }
                let voice = if turn.speaker == host_label {
                    persona.voice_id.as_str()
                } else {
                    "guest-1"
                };
                let audio = self
                    .tts
                    .synthesize(&audio::strip_source_tags(&turn.text), voice, 1.0, true)
                    .await?;
                rendered.push(audio.wav);
            }
            let joined = audio::concat_wav_turns(&rendered, INTER_TURN_SILENCE)?;
            let duration = audio::wav_duration_sec(&joined)?;
            (joined, duration)
        } else {
            let audio = self
                .tts
                .synthesize(
                    &audio::strip_source_tags(&script),
                    &persona.voice_id,
                    1.0,
                    true,
                )
                .await?;
            let duration = audio.duration_sec;
            (audio.wav, duration)
        };

        let raw_key = raw_audio_key();
        self.blob
            .upload(AUDIO_BUCKET, &raw_key, wav.clone(), "audio/wav")
            .await?;

        let asset = Asset::new(audio::audio_content_hash(&wav), raw_key);
        let asset_id = asset.id.clone();
        self.store.insert_asset(asset).await?;
        self.store
            .bind_segment_asset(&segment.id, &asset_id, Some(duration_sec))
            .await?;
        segment.asset_id = Some(asset_id);
        segment.duration_sec = Some(duration_sec);

        Ok(segment)
    }

    /// On failure: record the error; mark the segment failed when the
    /// failure is fatal or this was the job's last attempt.
    async fn record_failure(&self, segment_id: &SegmentId, job: &JobRecord, err: &StationError) {
        if let Err(store_err) = self
            .store
            .set_segment_error(segment_id, &err.to_string())
            .await
        {
            warn!(error = %store_err, "failed to record segment error");
        }

        let exhausted = job.attempts >= job.max_attempts;
        if err.kind() == farcast_core::ErrorKind::Integrity || exhausted {
            if let Err(transition_err) = self
                .store
                .transition_segment(segment_id, SegmentState::Failed)
                .await
            {
                warn!(error = %transition_err, "failed to mark segment failed");
            }
        }
    }
}

#[async_trait]
impl JobHandler for SegmentMakeHandler {
    async fn handle(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<(), JobError> {
        let payload: SegmentMakeJob = job
            .payload_json()
            .map_err(|e| JobError::fatal(format!("bad segment_make payload: {e}")))?;

        match self.make(&payload.segment_id, cancel).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.record_failure(&payload.segment_id, job, &err).await;
                Err(err.into_job_error())
            }
        }
    }
}
