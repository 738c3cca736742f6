//! S3-compatible blob store backend.
//!
//! Honors a custom endpoint (`BLOB_URL`) so any S3-compatible object store
//! works; signed URLs use real SDK presigning.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::debug;

use crate::store::BlobStore;
use crate::{BlobError, BlobResult};

/// Blob store backed by an S3-compatible service.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    /// Build from ambient AWS configuration, optionally overriding the
    /// endpoint for S3-compatible stores.
    pub async fn from_env(endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
        }
    }

    /// Wrap an existing client.
    pub fn with_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> BlobResult<()> {
        debug!(bucket, key, size = bytes.len(), "uploading blob");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> BlobResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    BlobError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    BlobError::backend(service_err)
                }
            })?;

        let data = output.body.collect().await.map_err(BlobError::backend)?;
        Ok(data.into_bytes())
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> BlobResult<()> {
        for key in keys {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(BlobError::backend)?;
        }
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> BlobResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| BlobError::Signing(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| BlobError::Signing(e.to_string()))?;
        Ok(presigned.uri().to_string())
    }
}
