//! # farcast-station: Orchestration and Playout
//!
//! The crate that turns the other Farcast services into a radio station:
//!
//! - **Segment orchestrator** ([`segment_worker`]) — drives a segment
//!   through `queued → retrieving → generating → rendering → normalizing`,
//!   calling retrieval, script generation, and TTS, then hands mastering a
//!   `audio_finalize` job.
//! - **Mastering** ([`mastering`]) — loudness normalization, quality
//!   validation, content-hash dedupe, and promotion to `ready`.
//! - **Playout feed** ([`playout`], [`http`]) — serves the next ready
//!   segments to the stream engine with short-lived signed URLs and
//!   records airing state.
//!
//! Every handler is idempotent: jobs are delivered at least once, and a
//! re-delivered job resumes from the segment's persisted state rather
//! than redoing completed work.

pub mod audio;
pub mod error;
pub mod http;
pub mod mastering;
pub mod normalize;
pub mod playout;
pub mod segment_worker;
pub mod store;
pub mod tts;

pub use error::{StationError, StationResult};
pub use http::{router, AppState};
pub use mastering::{AudioFinalizeHandler, AudioFinalizeJob, AUDIO_FINALIZE_JOB};
pub use normalize::{FfmpegNormalizer, LoudnessReport, LoudnessTarget, Normalizer};
pub use playout::{PlayoutFeed, PlayoutItem};
pub use segment_worker::{SegmentMakeHandler, SegmentMakeJob, SEGMENT_MAKE_JOB};
pub use store::{MemoryStationStore, StationStore, ToneAggregate, ToneRecord};
pub use tts::{HttpTtsClient, SynthesizedAudio, TtsClient};
