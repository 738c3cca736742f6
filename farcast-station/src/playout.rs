//! The playout feed: what the stream engine plays next.
//!
//! `next` is read-only — handing out the queue never mutates state; the
//! stream engine reports back through `now_playing` and `aired`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use farcast_blob::{BlobStore, AUDIO_BUCKET};
use farcast_core::{Segment, SegmentId, SegmentState, SlotType};

use crate::store::StationStore;
use crate::StationResult;

/// Default lifetime of the signed audio URLs handed to the stream engine.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// One entry in the next-to-play queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutItem {
    pub segment_id: SegmentId,
    pub slot_type: SlotType,
    pub lang: String,
    pub priority: u8,
    pub scheduled_start_ts: Option<DateTime<Utc>>,
    pub duration_sec: Option<f64>,

    /// Short-lived signed URL to the final audio
    pub audio_url: String,
}

/// Playout feed over the station store and blob store.
pub struct PlayoutFeed {
    store: Arc<dyn StationStore>,
    blob: Arc<dyn BlobStore>,
    url_ttl: Duration,
}

impl PlayoutFeed {
    pub fn new(store: Arc<dyn StationStore>, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blob,
            url_ttl: SIGNED_URL_TTL,
        }
    }

    /// Up to `limit` ready segments in playout order, each with a signed
    /// audio URL. Does not mutate any state; an empty queue is an empty
    /// list (the stream engine falls back to its emergency playlist).
    pub async fn next(&self, limit: usize) -> StationResult<Vec<PlayoutItem>> {
        let ready = self.store.ready_segments(limit).await?;
        let mut items = Vec::with_capacity(ready.len());

        for segment in ready {
            let Some(asset_id) = segment.asset_id.clone() else {
                continue;
            };
            let asset = self.store.get_asset(&asset_id).await?;
            let audio_url = self
                .blob
                .signed_url(AUDIO_BUCKET, &asset.storage_path, self.url_ttl)
                .await?;
            items.push(PlayoutItem {
                segment_id: segment.id,
                slot_type: segment.slot_type,
                lang: segment.lang,
                priority: segment.priority,
                scheduled_start_ts: segment.scheduled_start_ts,
                duration_sec: segment.duration_sec.or(asset.duration_sec),
                audio_url,
            });
        }

        debug!(count = items.len(), "playout queue served");
        Ok(items)
    }

    /// The stream engine started playing a segment: `ready → airing`.
    /// Idempotent when the segment is already airing.
    pub async fn now_playing(&self, segment_id: &SegmentId) -> StationResult<Segment> {
        let segment = self.store.get_segment(segment_id).await?;
        if segment.state == SegmentState::Airing {
            return Ok(segment);
        }
        let segment = self
            .store
            .transition_segment(segment_id, SegmentState::Airing)
            .await?;
        info!(%segment_id, "segment on air");
        Ok(segment)
    }

    /// The stream engine finished a segment: `airing → aired`.
    pub async fn aired(
        &self,
        segment_id: &SegmentId,
        aired_at: DateTime<Utc>,
    ) -> StationResult<Segment> {
        let segment = self.store.mark_aired(segment_id, aired_at).await?;
        info!(%segment_id, "segment aired");
        Ok(segment)
    }
}
