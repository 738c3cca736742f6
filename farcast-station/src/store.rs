use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use farcast_core::{
    Asset, AssetId, Citation, Segment, SegmentId, SegmentState, SlotType, ValidationStatus,
};

use crate::{StationError, StationResult};

/// A tone score recorded for one generated script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneRecord {
    pub segment_id: SegmentId,
    pub slot_type: SlotType,
    pub score: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Per-day tone aggregate served by the analytics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneAggregate {
    pub date: NaiveDate,
    pub count: usize,
    pub mean_score: f64,
    pub min_score: u32,
    pub max_score: u32,

    /// Scripts that scored under the configured floor
    pub below_threshold: usize,
}

/// Persistence seam for segments, assets, and tone scores.
///
/// The transition methods are the only way a segment's state changes;
/// they enforce the lifecycle table and reject anything else as an
/// integrity violation.
#[async_trait]
pub trait StationStore: Send + Sync {
    /// Insert a new segment row.
    async fn insert_segment(&self, segment: Segment) -> StationResult<()>;

    /// Fetch a segment row.
    async fn get_segment(&self, id: &SegmentId) -> StationResult<Segment>;

    /// Find another segment sharing this idempotency key whose earlier
    /// run persisted a script — the donor for retry-safe reuse. Donors
    /// with a validated asset are preferred over script-only ones.
    async fn find_segment_by_idempotency_key(
        &self,
        key: &str,
        exclude: &SegmentId,
    ) -> StationResult<Option<Segment>>;

    /// Move a segment along a legal lifecycle edge and return the updated
    /// row. Illegal edges fail with [`StationError::IllegalTransition`].
    async fn transition_segment(
        &self,
        id: &SegmentId,
        next: SegmentState,
    ) -> StationResult<Segment>;

    /// Record a pipeline failure on the segment.
    async fn set_segment_error(&self, id: &SegmentId, error: &str) -> StationResult<()>;

    /// Persist the generated script and its citations.
    async fn set_segment_script(
        &self,
        id: &SegmentId,
        script_md: &str,
        citations: &[Citation],
    ) -> StationResult<()>;

    /// Bind an asset to a segment.
    async fn bind_segment_asset(
        &self,
        id: &SegmentId,
        asset_id: &AssetId,
        duration_sec: Option<f64>,
    ) -> StationResult<()>;

    /// Ready segments with bound assets, ordered by `scheduled_start_ts`
    /// ascending (unscheduled last) then priority descending.
    async fn ready_segments(&self, limit: usize) -> StationResult<Vec<Segment>>;

    /// Stamp a segment as aired.
    async fn mark_aired(
        &self,
        id: &SegmentId,
        aired_at: DateTime<Utc>,
    ) -> StationResult<Segment>;

    /// Insert a new asset row.
    async fn insert_asset(&self, asset: Asset) -> StationResult<()>;

    /// Fetch an asset row.
    async fn get_asset(&self, id: &AssetId) -> StationResult<Asset>;

    /// Replace an asset row.
    async fn update_asset(&self, asset: Asset) -> StationResult<()>;

    /// Find a validated asset with the given content hash (dedupe).
    async fn find_passed_asset_by_hash(&self, content_hash: &str)
        -> StationResult<Option<Asset>>;

    /// Record a tone score for a generated script.
    async fn record_tone(&self, record: ToneRecord) -> StationResult<()>;

    /// Aggregate tone scores for one day.
    async fn tone_aggregate(
        &self,
        date: NaiveDate,
        threshold: u32,
    ) -> StationResult<ToneAggregate>;
}

/// In-memory station store for development and tests.
#[derive(Default)]
pub struct MemoryStationStore {
    segments: Arc<RwLock<HashMap<SegmentId, Segment>>>,
    assets: Arc<RwLock<HashMap<AssetId, Asset>>>,
    tones: Arc<RwLock<Vec<ToneRecord>>>,
}

impl MemoryStationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StationStore for MemoryStationStore {
    async fn insert_segment(&self, segment: Segment) -> StationResult<()> {
        self.segments.write().insert(segment.id.clone(), segment);
        Ok(())
    }

    async fn get_segment(&self, id: &SegmentId) -> StationResult<Segment> {
        self.segments
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StationError::SegmentNotFound(id.to_string()))
    }

    async fn find_segment_by_idempotency_key(
        &self,
        key: &str,
        exclude: &SegmentId,
    ) -> StationResult<Option<Segment>> {
        let segments = self.segments.read();
        let assets = self.assets.read();

        let has_passed_asset = |segment: &Segment| {
            segment
                .asset_id
                .as_ref()
                .and_then(|id| assets.get(id))
                .map(|a| a.validation_status == ValidationStatus::Passed)
                .unwrap_or(false)
        };

        let mut best: Option<&Segment> = None;
        for candidate in segments.values() {
            if candidate.idempotency_key.as_deref() != Some(key)
                || &candidate.id == exclude
                || candidate.script_md.is_none()
            {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => has_passed_asset(candidate) && !has_passed_asset(current),
            };
            if better {
                best = Some(candidate);
            }
        }
        Ok(best.cloned())
    }

    async fn transition_segment(
        &self,
        id: &SegmentId,
        next: SegmentState,
    ) -> StationResult<Segment> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(id)
            .ok_or_else(|| StationError::SegmentNotFound(id.to_string()))?;

        if !segment.state.can_transition_to(next) {
            return Err(StationError::IllegalTransition {
                from: segment.state.to_string(),
                to: next.to_string(),
            });
        }
        segment.state = next;
        segment.updated_at = Utc::now();
        Ok(segment.clone())
    }

    async fn set_segment_error(&self, id: &SegmentId, error: &str) -> StationResult<()> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(id)
            .ok_or_else(|| StationError::SegmentNotFound(id.to_string()))?;
        segment.last_error = Some(error.to_string());
        segment.retry_count += 1;
        segment.updated_at = Utc::now();
        Ok(())
    }

    async fn set_segment_script(
        &self,
        id: &SegmentId,
        script_md: &str,
        citations: &[Citation],
    ) -> StationResult<()> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(id)
            .ok_or_else(|| StationError::SegmentNotFound(id.to_string()))?;
        segment.script_md = Some(script_md.to_string());
        segment.citations = citations.to_vec();
        segment.updated_at = Utc::now();
        Ok(())
    }

    async fn bind_segment_asset(
        &self,
        id: &SegmentId,
        asset_id: &AssetId,
        duration_sec: Option<f64>,
    ) -> StationResult<()> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(id)
            .ok_or_else(|| StationError::SegmentNotFound(id.to_string()))?;
        segment.asset_id = Some(asset_id.clone());
        if duration_sec.is_some() {
            segment.duration_sec = duration_sec;
        }
        segment.updated_at = Utc::now();
        Ok(())
    }

    async fn ready_segments(&self, limit: usize) -> StationResult<Vec<Segment>> {
        let mut ready: Vec<Segment> = self
            .segments
            .read()
            .values()
            .filter(|s| s.state == SegmentState::Ready && s.asset_id.is_some())
            .cloned()
            .collect();

        ready.sort_by(|a, b| {
            match (a.scheduled_start_ts, b.scheduled_start_ts) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(b.priority.cmp(&a.priority))
        });
        ready.truncate(limit);
        Ok(ready)
    }

    async fn mark_aired(
        &self,
        id: &SegmentId,
        aired_at: DateTime<Utc>,
    ) -> StationResult<Segment> {
        let mut segments = self.segments.write();
        let segment = segments
            .get_mut(id)
            .ok_or_else(|| StationError::SegmentNotFound(id.to_string()))?;

        if !segment.state.can_transition_to(SegmentState::Aired) {
            return Err(StationError::IllegalTransition {
                from: segment.state.to_string(),
                to: SegmentState::Aired.to_string(),
            });
        }
        segment.state = SegmentState::Aired;
        segment.aired_at = Some(aired_at);
        segment.updated_at = Utc::now();
        Ok(segment.clone())
    }

    async fn insert_asset(&self, asset: Asset) -> StationResult<()> {
        self.assets.write().insert(asset.id.clone(), asset);
        Ok(())
    }

    async fn get_asset(&self, id: &AssetId) -> StationResult<Asset> {
        self.assets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StationError::AssetNotFound(id.to_string()))
    }

    async fn update_asset(&self, asset: Asset) -> StationResult<()> {
        let mut assets = self.assets.write();
        if !assets.contains_key(&asset.id) {
            return Err(StationError::AssetNotFound(asset.id.to_string()));
        }
        assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    async fn find_passed_asset_by_hash(
        &self,
        content_hash: &str,
    ) -> StationResult<Option<Asset>> {
        Ok(self
            .assets
            .read()
            .values()
            .find(|a| {
                a.content_hash == content_hash
                    && a.validation_status == ValidationStatus::Passed
            })
            .cloned())
    }

    async fn record_tone(&self, record: ToneRecord) -> StationResult<()> {
        self.tones.write().push(record);
        Ok(())
    }

    async fn tone_aggregate(
        &self,
        date: NaiveDate,
        threshold: u32,
    ) -> StationResult<ToneAggregate> {
        let tones = self.tones.read();
        let scores: Vec<u32> = tones
            .iter()
            .filter(|r| r.recorded_at.date_naive() == date)
            .map(|r| r.score)
            .collect();

        let count = scores.len();
        let mean_score = if count == 0 {
            0.0
        } else {
            scores.iter().map(|&s| s as f64).sum::<f64>() / count as f64
        };

        Ok(ToneAggregate {
            date,
            count,
            mean_score,
            min_score: scores.iter().copied().min().unwrap_or(0),
            max_score: scores.iter().copied().max().unwrap_or(0),
            below_threshold: scores.iter().filter(|&&s| s < threshold).count(),
        })
    }
}
