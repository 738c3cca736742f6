//! Batched, cached access to the external embedding API.
//!
//! Misses are grouped into fixed-size batches with an inter-batch delay to
//! respect upstream rate limits; hits come from a per-process LRU keyed by
//! content hash. The service itself never retries — failures surface to
//! the worker runtime, whose backoff policy owns retry timing.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{KbError, KbResult};

/// Fixed dimension of the station's embedding model.
pub const EMBEDDING_DIM: usize = 1024;

/// Tunables for the embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// LRU capacity, in entries
    pub cache_capacity: usize,

    /// Maximum inputs per API call
    pub batch_size: usize,

    /// Pause between consecutive batches
    pub inter_batch_delay: Duration,

    /// Per-batch wall-clock budget
    pub request_timeout: Duration,

    /// Required vector dimension
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            batch_size: 32,
            inter_batch_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            dimension: EMBEDDING_DIM,
        }
    }
}

/// One text to embed, keyed by its content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
    pub content_hash: String,
}

/// An embedding result, in the same position as its request.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub content_hash: String,
    pub vector: Vec<f32>,

    /// Whether the vector came from the cache
    pub cached: bool,
}

/// The external embedding API seam.
#[async_trait]
pub trait EmbeddingApi: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> KbResult<Vec<Vec<f32>>>;
}

/// reqwest-backed embedding API client.
pub struct HttpEmbeddingApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbedHttpRequest<'a> {
    inputs: &'a [String],
}

impl HttpEmbeddingApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingApi for HttpEmbeddingApi {
    async fn embed(&self, inputs: &[String]) -> KbResult<Vec<Vec<f32>>> {
        let mut request = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedHttpRequest { inputs });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        match response.status().as_u16() {
            429 => return Err(KbError::RateLimited),
            503 => return Err(KbError::ModelLoading),
            status if status >= 400 => {
                return Err(KbError::Api(format!(
                    "embedding API returned {status}: {}",
                    response.text().await.unwrap_or_default()
                )));
            }
            _ => {}
        }

        Ok(response.json().await?)
    }
}

/// Content-hash-cached, batch-limited embedding front end.
pub struct EmbeddingService {
    api: Arc<dyn EmbeddingApi>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(api: Arc<dyn EmbeddingApi>, config: EmbeddingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("non-zero capacity");
        Self {
            api,
            cache: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Embed a single text without touching the cache, in either
    /// direction. Retrieval queries use this: a query must always reflect
    /// its current text, and writing one-shot entries into the LRU would
    /// only evict chunk embeddings that will be asked for again.
    pub async fn embed_uncached(&self, text: &str) -> KbResult<Vec<f32>> {
        let inputs = [text.to_string()];
        let vectors = tokio::time::timeout(self.config.request_timeout, self.api.embed(&inputs))
            .await
            .map_err(|_| KbError::Timeout(self.config.request_timeout))??;

        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| KbError::Api("embedding API returned no vector".to_string()))?;
        if vector.len() != self.config.dimension {
            return Err(KbError::DimMismatch {
                expected: self.config.dimension,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Embed many texts, preserving input order. Cache hits are marked
    /// `cached`; misses are fetched in batches of at most
    /// [`EmbeddingConfig::batch_size`] with the configured inter-batch
    /// delay.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn embed_many(&self, requests: &[EmbedRequest]) -> KbResult<Vec<Embedded>> {
        // First pass: resolve hits and collect distinct misses.
        let mut cached: Vec<Option<Vec<f32>>> = Vec::with_capacity(requests.len());
        let mut miss_hashes: Vec<String> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for request in requests {
                match cache.get(&request.content_hash) {
                    Some(vector) => cached.push(Some(vector.clone())),
                    None => {
                        cached.push(None);
                        if !miss_hashes.contains(&request.content_hash) {
                            miss_hashes.push(request.content_hash.clone());
                            miss_texts.push(request.text.clone());
                        }
                    }
                }
            }
        }

        debug!(hits = requests.len() - miss_hashes.len(), misses = miss_hashes.len(), "embedding cache lookup");

        // Fetch misses batch by batch.
        let mut fetched: Vec<Vec<f32>> = Vec::with_capacity(miss_texts.len());
        for (batch_index, batch) in miss_texts.chunks(self.config.batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
            let vectors = tokio::time::timeout(self.config.request_timeout, self.api.embed(batch))
                .await
                .map_err(|_| KbError::Timeout(self.config.request_timeout))??;

            if vectors.len() != batch.len() {
                return Err(KbError::Api(format!(
                    "embedding API returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            for vector in &vectors {
                if vector.len() != self.config.dimension {
                    return Err(KbError::DimMismatch {
                        expected: self.config.dimension,
                        got: vector.len(),
                    });
                }
            }
            fetched.extend(vectors);
        }

        // Populate the cache with the new vectors.
        {
            let mut cache = self.cache.lock();
            for (hash, vector) in miss_hashes.iter().zip(fetched.iter()) {
                cache.put(hash.clone(), vector.clone());
            }
        }

        // Second pass: assemble results in input order.
        let mut results = Vec::with_capacity(requests.len());
        for (request, hit) in requests.iter().zip(cached.into_iter()) {
            match hit {
                Some(vector) => results.push(Embedded {
                    content_hash: request.content_hash.clone(),
                    vector,
                    cached: true,
                }),
                None => {
                    let position = miss_hashes
                        .iter()
                        .position(|h| h == &request.content_hash)
                        .expect("miss recorded for request");
                    results.push(Embedded {
                        content_hash: request.content_hash.clone(),
                        vector: fetched[position].clone(),
                        cached: false,
                    });
                }
            }
        }

        Ok(results)
    }
}
