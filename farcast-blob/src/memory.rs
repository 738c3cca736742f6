use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;

use crate::store::{BlobStore, StoredBlob};
use crate::{BlobError, BlobResult};

/// In-memory blob store for development and tests.
///
/// Tracks per-prefix upload counts so dedupe tests can assert that a
/// content-hash match produced exactly one `final/` upload.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), StoredBlob>>>,
    uploads: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total upload calls observed (test helper).
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Upload calls whose key starts with `prefix` (test helper).
    pub fn keys_with_prefix(&self, bucket: &str, prefix: &str) -> Vec<String> {
        self.blobs
            .read()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Whether a blob exists (test helper).
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.blobs
            .read()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> BlobResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.blobs.write().insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> BlobResult<Bytes> {
        self.blobs
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> BlobResult<()> {
        let mut blobs = self.blobs.write();
        for key in keys {
            blobs.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> BlobResult<String> {
        if !self.contains(bucket, key) {
            return Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("memory://{bucket}/{key}?expires={expires}"))
    }
}
