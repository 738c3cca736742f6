//! The `audio_finalize` job handler (mastering orchestrator).
//!
//! Takes a raw rendered asset through loudness normalization and quality
//! validation, promotes the segment to `ready`, and reclaims the raw
//! object. Assets are content-addressed: a hash match against an already
//! validated asset short-circuits into a rebind with no second upload.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use farcast_blob::{final_audio_key, BlobStore, AUDIO_BUCKET};
use farcast_core::{AssetId, SegmentId, SegmentState, ValidationStatus};
use farcast_queue::{JobError, JobHandler, JobRecord};

use crate::normalize::{LoudnessTarget, Normalizer};
use crate::store::StationStore;
use crate::{StationError, StationResult};

/// Job type consumed by the mastering worker.
pub const AUDIO_FINALIZE_JOB: &str = "audio_finalize";

/// Payload of an `audio_finalize` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFinalizeJob {
    pub segment_id: SegmentId,
    pub asset_id: AssetId,
    pub content_type: String,
}

/// Mastering orchestrator dependencies.
pub struct AudioFinalizeHandler {
    store: Arc<dyn StationStore>,
    blob: Arc<dyn BlobStore>,
    normalizer: Arc<dyn Normalizer>,
}

impl AudioFinalizeHandler {
    pub fn new(
        store: Arc<dyn StationStore>,
        blob: Arc<dyn BlobStore>,
        normalizer: Arc<dyn Normalizer>,
    ) -> Self {
        Self {
            store,
            blob,
            normalizer,
        }
    }

    #[instrument(skip_all, fields(segment_id = %payload.segment_id, asset_id = %payload.asset_id))]
    async fn finalize(
        &self,
        payload: &AudioFinalizeJob,
        cancel: &CancellationToken,
    ) -> StationResult<()> {
        let mut asset = self.store.get_asset(&payload.asset_id).await?;

        // A re-delivered job whose earlier run already promoted the
        // segment has nothing left to do; one whose earlier run failed
        // validation keeps failing until the retry budget dead-letters it.
        let segment = self.store.get_segment(&payload.segment_id).await?;
        match segment.state {
            SegmentState::Normalizing => {}
            SegmentState::Failed => {
                return Err(StationError::AudioQuality(
                    segment
                        .last_error
                        .unwrap_or_else(|| "failed in an earlier delivery".to_string()),
                ));
            }
            state => {
                info!(%state, "segment already past normalizing");
                return Ok(());
            }
        }

        // Dedupe: an equivalent validated asset absorbs this one.
        if let Some(existing) = self
            .store
            .find_passed_asset_by_hash(&asset.content_hash)
            .await?
        {
            if existing.id != asset.id {
                info!(duplicate_of = %existing.id, "content hash match; rebinding");
                self.store
                    .bind_segment_asset(&payload.segment_id, &existing.id, existing.duration_sec)
                    .await?;
                asset.mark_duplicate_of(&existing.id);
                self.store.update_asset(asset.clone()).await?;
                // The duplicate raw object is no longer needed.
                self.blob
                    .remove(AUDIO_BUCKET, &[asset.storage_path.clone()])
                    .await?;
                self.store
                    .transition_segment(&payload.segment_id, SegmentState::Ready)
                    .await?;
                return Ok(());
            }
        }

        let raw_key = asset.storage_path.clone();
        let raw = self.blob.download(AUDIO_BUCKET, &raw_key).await?;

        if cancel.is_cancelled() {
            return Err(StationError::Storage("mastering cancelled".to_string()));
        }

        // Normalize in a scratch directory.
        let target = LoudnessTarget::for_content_type(&payload.content_type);
        let scratch = tempfile::tempdir()
            .map_err(|e| StationError::Normalizer(format!("scratch dir: {e}")))?;
        let input_path = scratch.path().join("input.wav");
        let output_path = scratch.path().join("normalized.wav");
        tokio::fs::write(&input_path, &raw)
            .await
            .map_err(|e| StationError::Normalizer(format!("write scratch: {e}")))?;

        let report = self
            .normalizer
            .normalize(&input_path, &output_path, &target)
            .await?;
        let normalized = tokio::fs::read(&output_path)
            .await
            .map_err(|e| StationError::Normalizer(format!("read normalized: {e}")))?;

        let errors = report.validation_errors(&target);
        let final_key = final_audio_key(asset.id.as_str());

        // Even failing audio is uploaded so operators can audit it.
        self.blob
            .upload(AUDIO_BUCKET, &final_key, Bytes::from(normalized), "audio/wav")
            .await?;

        asset.storage_path = final_key;
        asset.lufs_integrated = Some(report.lufs_integrated);
        asset.peak_db = Some(report.peak_db);
        asset.duration_sec = Some(report.duration_sec);
        asset.updated_at = chrono::Utc::now();

        if errors.is_empty() {
            asset.validation_status = ValidationStatus::Passed;
            self.store.update_asset(asset.clone()).await?;

            self.blob.remove(AUDIO_BUCKET, &[raw_key]).await?;
            self.store
                .bind_segment_asset(
                    &payload.segment_id,
                    &asset.id,
                    Some(report.duration_sec),
                )
                .await?;
            self.store
                .transition_segment(&payload.segment_id, SegmentState::Ready)
                .await?;

            info!(lufs = report.lufs_integrated, "segment ready for playout");
            Ok(())
        } else {
            warn!(?errors, "normalized audio failed validation");
            asset.validation_status = ValidationStatus::Failed;
            asset.validation_errors = errors.clone();
            self.store.update_asset(asset).await?;
            self.store
                .set_segment_error(&payload.segment_id, &errors.join("; "))
                .await?;
            self.store
                .transition_segment(&payload.segment_id, SegmentState::Failed)
                .await?;
            Err(StationError::AudioQuality(errors.join("; ")))
        }
    }
}

#[async_trait]
impl JobHandler for AudioFinalizeHandler {
    async fn handle(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<(), JobError> {
        let payload: AudioFinalizeJob = job
            .payload_json()
            .map_err(|e| JobError::fatal(format!("bad audio_finalize payload: {e}")))?;

        self.finalize(&payload, cancel)
            .await
            .map_err(StationError::into_job_error)
    }
}
