//! # farcast-blob: Blob Storage for Broadcast Audio Artifacts
//!
//! A thin seam over a content-addressed object store. The pipeline treats
//! audio artifacts as opaque blobs under a fixed layout:
//!
//! - `audio-assets/raw/<ts>-<rand>.wav` — freshly rendered audio awaiting
//!   mastering. Keys carry a random suffix so concurrent renders never
//!   collide.
//! - `audio-assets/final/<asset_id>.wav` — normalized audio; writes are
//!   idempotent overwrites keyed by asset id.
//!
//! Playout hands the stream engine short-lived signed URLs rather than
//! proxying bytes. The in-memory backend is the default wiring for tests
//! and development; the `s3` feature provides an S3-compatible backend
//! with real presigning.

pub mod error;
pub mod memory;
pub mod store;

#[cfg(feature = "s3")]
pub mod s3;

pub use error::{BlobError, BlobResult};
pub use memory::MemoryBlobStore;
pub use store::{final_audio_key, raw_audio_key, BlobStore, StoredBlob, AUDIO_BUCKET};

#[cfg(feature = "s3")]
pub use s3::S3BlobStore;
