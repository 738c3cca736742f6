use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use farcast_core::{ChunkId, KbChunk, KbIndexStatus, SourceDoc, SourceId, SourceType};

use crate::{KbError, KbResult};

/// sha-256 of a text, rendered as lowercase hex.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// A chunk with a retrieval-leg score attached.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: KbChunk,

    /// Leg-specific score in [0, 1]
    pub score: f32,

    /// In-universe event date, for recency boosting of event sources
    pub event_date: Option<DateTime<Utc>>,

    /// Display title of the owning source, when known
    pub title: Option<String>,
}

/// Persistence seam for sources, chunks, embeddings, and index status.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace an upstream source row.
    async fn put_source(&self, doc: SourceDoc) -> KbResult<()>;

    /// Fetch an upstream source row.
    async fn get_source(&self, source_type: SourceType, source_id: &SourceId)
        -> KbResult<SourceDoc>;

    /// Replace the chunk sequence for a source. Prior chunks and their
    /// embeddings are removed so re-indexing is idempotent.
    async fn replace_chunks(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
        chunks: Vec<KbChunk>,
    ) -> KbResult<()>;

    /// Store a chunk embedding.
    async fn put_embedding(&self, chunk_id: &ChunkId, vector: Vec<f32>) -> KbResult<()>;

    /// Fetch a chunk row.
    async fn get_chunk(&self, chunk_id: &ChunkId) -> KbResult<KbChunk>;

    /// Chunks for a source in sequence order (test/ops introspection).
    async fn chunks_for_source(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
    ) -> KbResult<Vec<KbChunk>>;

    /// Stored embedding for a chunk, if any.
    async fn get_embedding(&self, chunk_id: &ChunkId) -> KbResult<Option<Vec<f32>>>;

    /// Cosine-similarity search over stored embeddings. Results below
    /// `threshold` are dropped; scores are similarity in [0, 1].
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        source_types: Option<&[SourceType]>,
    ) -> KbResult<Vec<ScoredChunk>>;

    /// Keyword search over chunk text. Score is the fraction of query
    /// keywords present in the chunk; full matches rank first.
    async fn lexical_search(
        &self,
        keywords: &[String],
        limit: usize,
        source_types: Option<&[SourceType]>,
    ) -> KbResult<Vec<ScoredChunk>>;

    /// Upsert the indexing status row for a source.
    async fn upsert_index_status(&self, status: KbIndexStatus) -> KbResult<()>;

    /// Fetch the indexing status row for a source.
    async fn get_index_status(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
    ) -> KbResult<Option<KbIndexStatus>>;
}

/// Cosine similarity of two vectors; 0.0 when either has no magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory knowledge store for development and tests. Vector search is
/// brute-force cosine over every stored embedding.
#[derive(Default)]
pub struct MemoryKnowledgeStore {
    sources: Arc<RwLock<HashMap<(SourceType, SourceId), SourceDoc>>>,
    chunks: Arc<RwLock<HashMap<ChunkId, KbChunk>>>,
    embeddings: Arc<RwLock<HashMap<ChunkId, Vec<f32>>>>,
    statuses: Arc<RwLock<HashMap<(SourceType, SourceId), KbIndexStatus>>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn source_meta(&self, chunk: &KbChunk) -> (Option<DateTime<Utc>>, Option<String>) {
        match self
            .sources
            .read()
            .get(&(chunk.source_type, chunk.source_id.clone()))
        {
            Some(doc) => (doc.event_date, Some(doc.title.clone())),
            None => (None, None),
        }
    }

    fn type_allowed(chunk: &KbChunk, filter: Option<&[SourceType]>) -> bool {
        filter.map_or(true, |types| types.contains(&chunk.source_type))
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn put_source(&self, doc: SourceDoc) -> KbResult<()> {
        self.sources
            .write()
            .insert((doc.source_type, doc.id.clone()), doc);
        Ok(())
    }

    async fn get_source(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
    ) -> KbResult<SourceDoc> {
        self.sources
            .read()
            .get(&(source_type, source_id.clone()))
            .cloned()
            .ok_or_else(|| KbError::SourceNotFound {
                source_type: source_type.to_string(),
                source_id: source_id.to_string(),
            })
    }

    async fn replace_chunks(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
        chunks: Vec<KbChunk>,
    ) -> KbResult<()> {
        let mut chunk_map = self.chunks.write();
        let mut embeddings = self.embeddings.write();

        let stale: Vec<ChunkId> = chunk_map
            .values()
            .filter(|c| c.source_type == source_type && &c.source_id == source_id)
            .map(|c| c.id.clone())
            .collect();
        for id in stale {
            chunk_map.remove(&id);
            embeddings.remove(&id);
        }

        for chunk in chunks {
            chunk_map.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn put_embedding(&self, chunk_id: &ChunkId, vector: Vec<f32>) -> KbResult<()> {
        if !self.chunks.read().contains_key(chunk_id) {
            return Err(KbError::ChunkNotFound(chunk_id.to_string()));
        }
        self.embeddings.write().insert(chunk_id.clone(), vector);
        Ok(())
    }

    async fn get_chunk(&self, chunk_id: &ChunkId) -> KbResult<KbChunk> {
        self.chunks
            .read()
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| KbError::ChunkNotFound(chunk_id.to_string()))
    }

    async fn chunks_for_source(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
    ) -> KbResult<Vec<KbChunk>> {
        let mut chunks: Vec<KbChunk> = self
            .chunks
            .read()
            .values()
            .filter(|c| c.source_type == source_type && &c.source_id == source_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn get_embedding(&self, chunk_id: &ChunkId) -> KbResult<Option<Vec<f32>>> {
        Ok(self.embeddings.read().get(chunk_id).cloned())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        source_types: Option<&[SourceType]>,
    ) -> KbResult<Vec<ScoredChunk>> {
        let chunks = self.chunks.read();
        let embeddings = self.embeddings.read();

        let mut scored: Vec<ScoredChunk> = embeddings
            .iter()
            .filter_map(|(chunk_id, vector)| {
                let chunk = chunks.get(chunk_id)?;
                if !Self::type_allowed(chunk, source_types) {
                    return None;
                }
                let score = cosine_similarity(embedding, vector);
                if score < threshold {
                    return None;
                }
                let (event_date, title) = self.source_meta(chunk);
                Some(ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                    event_date,
                    title,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn lexical_search(
        &self,
        keywords: &[String],
        limit: usize,
        source_types: Option<&[SourceType]>,
    ) -> KbResult<Vec<ScoredChunk>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read();
        let mut scored: Vec<ScoredChunk> = chunks
            .values()
            .filter(|chunk| Self::type_allowed(chunk, source_types))
            .filter_map(|chunk| {
                let text = chunk.chunk_text.to_lowercase();
                let matched = keywords.iter().filter(|k| text.contains(k.as_str())).count();
                if matched == 0 {
                    return None;
                }
                let (event_date, title) = self.source_meta(chunk);
                Some(ScoredChunk {
                    chunk: chunk.clone(),
                    score: matched as f32 / keywords.len() as f32,
                    event_date,
                    title,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn upsert_index_status(&self, status: KbIndexStatus) -> KbResult<()> {
        self.statuses
            .write()
            .insert((status.source_type, status.source_id.clone()), status);
        Ok(())
    }

    async fn get_index_status(
        &self,
        source_type: SourceType,
        source_id: &SourceId,
    ) -> KbResult<Option<KbIndexStatus>> {
        Ok(self
            .statuses
            .read()
            .get(&(source_type, source_id.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, source: &str, text: &str) -> KbChunk {
        KbChunk {
            id: ChunkId::from(id),
            source_id: SourceId::from(source),
            source_type: SourceType::UniverseDoc,
            chunk_text: text.to_string(),
            chunk_index: 0,
            token_count: estimate(text),
            content_hash: content_hash(text),
            lang: "en".to_string(),
        }
    }

    fn estimate(text: &str) -> usize {
        (text.split_whitespace().count() as f64 * 1.3).ceil() as usize
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, 0.2, -0.3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn replace_chunks_is_idempotent() {
        let store = MemoryKnowledgeStore::new();
        let source = SourceId::from("doc-1");

        store
            .replace_chunks(
                SourceType::UniverseDoc,
                &source,
                vec![chunk("c1", "doc-1", "first pass")],
            )
            .await
            .unwrap();
        store
            .put_embedding(&ChunkId::from("c1"), vec![1.0, 0.0])
            .await
            .unwrap();

        store
            .replace_chunks(
                SourceType::UniverseDoc,
                &source,
                vec![chunk("c2", "doc-1", "second pass")],
            )
            .await
            .unwrap();

        let chunks = store
            .chunks_for_source(SourceType::UniverseDoc, &source)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id.as_str(), "c2");
        // The stale embedding went with its chunk.
        assert!(store.get_embedding(&ChunkId::from("c1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn vector_search_applies_threshold_and_order() {
        let store = MemoryKnowledgeStore::new();
        let source = SourceId::from("doc-1");
        store
            .replace_chunks(
                SourceType::UniverseDoc,
                &source,
                vec![
                    chunk("near", "doc-1", "near text"),
                    chunk("far", "doc-1", "far text"),
                    chunk("mid", "doc-1", "mid text"),
                ],
            )
            .await
            .unwrap();
        store.put_embedding(&ChunkId::from("near"), vec![1.0, 0.0]).await.unwrap();
        store.put_embedding(&ChunkId::from("far"), vec![0.0, 1.0]).await.unwrap();
        store.put_embedding(&ChunkId::from("mid"), vec![0.7, 0.7]).await.unwrap();

        let hits = store
            .vector_search(&[1.0, 0.0], 10, 0.3, None)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn lexical_search_scores_match_fraction() {
        let store = MemoryKnowledgeStore::new();
        let source = SourceId::from("doc-1");
        store
            .replace_chunks(
                SourceType::UniverseDoc,
                &source,
                vec![
                    chunk("both", "doc-1", "the colony anniversary celebration"),
                    chunk("one", "doc-1", "the colony expansion report"),
                    chunk("none", "doc-1", "weather on the relay stations"),
                ],
            )
            .await
            .unwrap();

        let keywords = vec!["colony".to_string(), "anniversary".to_string()];
        let hits = store.lexical_search(&keywords, 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id.as_str(), "both");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn source_type_filter_applies() {
        let store = MemoryKnowledgeStore::new();
        let mut event_chunk = chunk("ev", "event-1", "launch day festivities");
        event_chunk.source_type = SourceType::Event;
        store
            .replace_chunks(SourceType::Event, &SourceId::from("event-1"), vec![event_chunk])
            .await
            .unwrap();
        store
            .replace_chunks(
                SourceType::UniverseDoc,
                &SourceId::from("doc-1"),
                vec![chunk("doc", "doc-1", "launch procedures manual")],
            )
            .await
            .unwrap();

        let keywords = vec!["launch".to_string()];
        let only_events = store
            .lexical_search(&keywords, 10, Some(&[SourceType::Event]))
            .await
            .unwrap();
        assert_eq!(only_events.len(), 1);
        assert_eq!(only_events[0].chunk.id.as_str(), "ev");
    }
}
