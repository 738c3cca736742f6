use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;

use crate::BlobResult;

/// Bucket holding every pipeline audio artifact.
pub const AUDIO_BUCKET: &str = "audio-assets";

/// A stored blob with its content type.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Core blob storage operations — must be implemented by all backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob. Re-uploading the same key overwrites idempotently.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> BlobResult<()>;

    /// Fetch a blob's bytes.
    async fn download(&self, bucket: &str, key: &str) -> BlobResult<Bytes>;

    /// Delete blobs. Missing keys are ignored.
    async fn remove(&self, bucket: &str, keys: &[String]) -> BlobResult<()>;

    /// Produce a short-lived signed URL for reading a blob.
    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> BlobResult<String>;
}

/// Key for freshly rendered raw audio. The timestamp plus random suffix
/// guarantees uniqueness across concurrent renders.
pub fn raw_audio_key() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("raw/{}-{:06}.wav", Utc::now().timestamp_millis(), suffix)
}

/// Key for a normalized asset; overwrites are idempotent by asset id.
pub fn final_audio_key(asset_id: &str) -> String {
    format!("final/{asset_id}.wav")
}
