//! # farcast-core: Domain Model for the Farcast Broadcast Pipeline
//!
//! Shared vocabulary for every Farcast crate: segment lifecycle, audio
//! assets, knowledge-base chunks, worker health, the error taxonomy the
//! worker runtime maps onto retry policy, and environment configuration.
//!
//! This crate is deliberately free of I/O. Stores, queues, and HTTP live in
//! the crates that own them; everything here is plain data plus the
//! invariants that data must uphold (most importantly the segment state
//! machine in [`segment::SegmentState`]).

pub mod asset;
pub mod config;
pub mod error;
pub mod health;
pub mod ids;
pub mod kb;
pub mod segment;

pub use asset::{Asset, ValidationStatus};
pub use config::StationConfig;
pub use error::{ErrorKind, SemanticCode};
pub use health::HealthCheck;
pub use ids::{AssetId, ChunkId, ProgramId, SegmentId, SourceId};
pub use kb::{IndexState, KbChunk, KbIndexStatus, SourceDoc, SourceType};
pub use segment::{Citation, Segment, SegmentState, SlotType};
