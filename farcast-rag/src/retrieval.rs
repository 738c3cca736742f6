use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use farcast_core::{ChunkId, SourceId, SourceType};
use farcast_kb::{EmbeddingService, KnowledgeStore, ScoredChunk};

use crate::{RagError, RagResult};

/// Fusion weights and budgets. Defaults are the station's production
/// values.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Results returned when the query does not override `top_k`
    pub default_top_k: usize,

    /// Vector-leg similarity floor
    pub vector_threshold: f32,

    /// Weight of the vector score in the fused score
    pub vector_weight: f32,

    /// Weight of the lexical score in the fused score
    pub lexical_weight: f32,

    /// Keywords below this length carry no lexical signal
    pub min_keyword_len: usize,

    /// Keyword cap per query
    pub max_keywords: usize,

    /// Wall-clock budget for the whole retrieval
    pub budget: Duration,

    /// Days over which an event's recency boost decays to zero
    pub recency_window_days: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 12,
            vector_threshold: 0.3,
            vector_weight: 0.7,
            lexical_weight: 0.3,
            min_keyword_len: 3,
            max_keywords: 10,
            budget: Duration::from_millis(2000),
            recency_window_days: 30,
        }
    }
}

/// A retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQuery {
    /// Query text (synthesized per slot; see [`crate::QueryBuilder`])
    pub text: String,

    /// Result cap; the service default applies when absent
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Source-type whitelist applied to both legs
    #[serde(default)]
    pub source_types: Option<Vec<SourceType>>,

    /// Multiply event scores by their recency factor
    #[serde(default)]
    pub recency_boost: bool,

    /// In-universe broadcast instant anchoring the recency decay
    #[serde(default)]
    pub reference_time: Option<DateTime<Utc>>,
}

impl RagQuery {
    /// A plain text query with service defaults.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: None,
            source_types: None,
            recency_boost: false,
            reference_time: None,
        }
    }
}

/// One ranked chunk with its per-leg scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagChunk {
    pub chunk_id: ChunkId,
    pub source_id: SourceId,
    pub source_type: SourceType,
    pub chunk_text: String,

    /// Display title of the owning source, when known
    pub title: Option<String>,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub recency_score: f32,
    pub final_score: f32,
}

/// A completed retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRetrieval {
    pub chunks: Vec<RagChunk>,

    /// Wall-clock spent, in milliseconds
    pub query_time_ms: u64,

    /// Union size before the `top_k` cut
    pub total_results: usize,
}

/// Recency factor in `[0, 0.3]`: linear decay of the distance between the
/// event date and the reference time over `window_days`. Deterministic for
/// equal inputs and monotone non-increasing in the distance.
pub fn recency_score(
    event_date: DateTime<Utc>,
    reference_time: DateTime<Utc>,
    window_days: i64,
) -> f32 {
    let distance_days = (event_date - reference_time).num_days().abs();
    if distance_days >= window_days {
        return 0.0;
    }
    0.3 * (1.0 - distance_days as f32 / window_days as f32)
}

/// Hybrid lexical + vector + recency retrieval over the knowledge store.
pub struct RetrievalService {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<EmbeddingService>,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<EmbeddingService>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Run a retrieval within the configured wall-clock budget.
    #[instrument(skip_all, fields(top_k = query.top_k.unwrap_or(self.config.default_top_k)))]
    pub async fn retrieve(&self, query: &RagQuery) -> RagResult<RagRetrieval> {
        if query.text.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let started = Instant::now();
        let mut retrieval = tokio::time::timeout(self.config.budget, self.run(query))
            .await
            .map_err(|_| RagError::Timeout(self.config.budget))??;
        retrieval.query_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            returned = retrieval.chunks.len(),
            total = retrieval.total_results,
            elapsed_ms = retrieval.query_time_ms,
            "retrieval complete"
        );
        Ok(retrieval)
    }

    async fn run(&self, query: &RagQuery) -> RagResult<RagRetrieval> {
        let top_k = query.top_k.unwrap_or(self.config.default_top_k);
        let fetch = top_k * 2;
        let filter = query.source_types.as_deref();

        // The query embedding bypasses the cache on purpose: it must
        // always reflect the current text, and one-shot query entries
        // would only evict chunk embeddings.
        let embedding = self.embedder.embed_uncached(&query.text).await?;

        let keywords = extract_keywords(
            &query.text,
            self.config.min_keyword_len,
            self.config.max_keywords,
        );

        let (vector_hits, lexical_hits) = tokio::try_join!(
            self.store
                .vector_search(&embedding, fetch, self.config.vector_threshold, filter),
            self.store.lexical_search(&keywords, fetch, filter),
        )?;

        Ok(self.fuse(query, top_k, vector_hits, lexical_hits))
    }

    /// Union the two legs by chunk id, fuse scores, apply the recency
    /// multiplier, and cut to `top_k`.
    fn fuse(
        &self,
        query: &RagQuery,
        top_k: usize,
        vector_hits: Vec<ScoredChunk>,
        lexical_hits: Vec<ScoredChunk>,
    ) -> RagRetrieval {
        struct Merged {
            hit: ScoredChunk,
            vector_score: f32,
            lexical_score: f32,
        }

        let mut merged: HashMap<ChunkId, Merged> = HashMap::new();
        for hit in vector_hits {
            let score = hit.score;
            merged.insert(
                hit.chunk.id.clone(),
                Merged {
                    hit,
                    vector_score: score,
                    lexical_score: 0.0,
                },
            );
        }
        for hit in lexical_hits {
            match merged.get_mut(&hit.chunk.id) {
                Some(entry) => entry.lexical_score = hit.score,
                None => {
                    let score = hit.score;
                    merged.insert(
                        hit.chunk.id.clone(),
                        Merged {
                            hit,
                            vector_score: 0.0,
                            lexical_score: score,
                        },
                    );
                }
            }
        }

        let total_results = merged.len();
        let mut chunks: Vec<RagChunk> = merged
            .into_values()
            .map(|entry| {
                let mut final_score = self.config.vector_weight * entry.vector_score
                    + self.config.lexical_weight * entry.lexical_score;

                let mut recency = 0.0;
                if query.recency_boost && entry.hit.chunk.source_type == SourceType::Event {
                    if let (Some(event_date), Some(reference)) =
                        (entry.hit.event_date, query.reference_time)
                    {
                        recency =
                            recency_score(event_date, reference, self.config.recency_window_days);
                        final_score *= 1.0 + recency;
                    }
                }

                RagChunk {
                    chunk_id: entry.hit.chunk.id.clone(),
                    source_id: entry.hit.chunk.source_id.clone(),
                    source_type: entry.hit.chunk.source_type,
                    chunk_text: entry.hit.chunk.chunk_text.clone(),
                    title: entry.hit.title.clone(),
                    vector_score: entry.vector_score,
                    lexical_score: entry.lexical_score,
                    recency_score: recency,
                    final_score,
                }
            })
            .collect();

        chunks.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(top_k);

        RagRetrieval {
            chunks,
            query_time_ms: 0,
            total_results,
        }
    }
}

/// Lowercase the query, drop short words, and cap the keyword list.
fn extract_keywords(text: &str, min_len: usize, max_keywords: usize) -> Vec<String> {
    let mut keywords = Vec::new();
    for word in text.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.len() <= min_len || keywords.iter().any(|k| k == word) {
            continue;
        }
        keywords.push(word.to_string());
        if keywords.len() == max_keywords {
            break;
        }
    }
    keywords
}
