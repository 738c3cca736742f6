//! The `kb_index` job handler: source document → chunks → embeddings.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use farcast_core::{ChunkId, KbChunk, KbIndexStatus, SourceId, SourceType};
use farcast_queue::{JobError, JobHandler, JobRecord};

use crate::chunker::{chunk_markdown, ChunkerConfig};
use crate::embedding::{EmbedRequest, EmbeddingService};
use crate::lang::detect_language;
use crate::store::KnowledgeStore;
use crate::KbError;

/// Job type consumed by the indexing worker.
pub const KB_INDEX_JOB: &str = "kb_index";

/// Payload of a `kb_index` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbIndexJob {
    pub source_id: SourceId,
    pub source_type: SourceType,
}

/// Indexes one source row per job: chunk, embed, persist, update status.
///
/// Re-delivery is safe: chunk replacement is wholesale and embeddings are
/// keyed by chunk, so a partial earlier run leaves nothing stale behind.
pub struct KbIndexHandler {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<EmbeddingService>,
    chunker: ChunkerConfig,
}

impl KbIndexHandler {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<EmbeddingService>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
        }
    }

    #[instrument(skip_all, fields(source_id = %payload.source_id, source_type = %payload.source_type))]
    async fn index(
        &self,
        payload: &KbIndexJob,
        cancel: &CancellationToken,
    ) -> Result<(), KbError> {
        let mut status = self
            .store
            .get_index_status(payload.source_type, &payload.source_id)
            .await?
            .unwrap_or_else(|| {
                KbIndexStatus::pending(payload.source_id.clone(), payload.source_type)
            });
        status.start();
        self.store.upsert_index_status(status.clone()).await?;

        let doc = self
            .store
            .get_source(payload.source_type, &payload.source_id)
            .await?;

        let lang = doc
            .lang
            .clone()
            .unwrap_or_else(|| detect_language(&doc.body_md).lang);

        let drafts = chunk_markdown(&doc.body_md, &self.chunker);
        if cancel.is_cancelled() {
            return Err(KbError::Storage("indexing cancelled".to_string()));
        }

        let chunks: Vec<KbChunk> = drafts
            .iter()
            .map(|draft| KbChunk {
                id: ChunkId::new(),
                source_id: payload.source_id.clone(),
                source_type: payload.source_type,
                chunk_text: draft.text.clone(),
                chunk_index: draft.chunk_index,
                token_count: draft.token_count,
                content_hash: draft.content_hash.clone(),
                lang: lang.clone(),
            })
            .collect();

        let requests: Vec<EmbedRequest> = chunks
            .iter()
            .map(|chunk| EmbedRequest {
                text: chunk.chunk_text.clone(),
                content_hash: chunk.content_hash.clone(),
            })
            .collect();
        let embedded = self.embedder.embed_many(&requests).await?;

        if cancel.is_cancelled() {
            return Err(KbError::Storage("indexing cancelled".to_string()));
        }

        self.store
            .replace_chunks(payload.source_type, &payload.source_id, chunks.clone())
            .await?;
        let mut embeddings_created = 0;
        for (chunk, result) in chunks.iter().zip(embedded.iter()) {
            self.store
                .put_embedding(&chunk.id, result.vector.clone())
                .await?;
            embeddings_created += 1;
        }

        status.complete(chunks.len(), embeddings_created);
        self.store.upsert_index_status(status).await?;

        info!(chunks = chunks.len(), "source indexed");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for KbIndexHandler {
    async fn handle(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<(), JobError> {
        let payload: KbIndexJob = job
            .payload_json()
            .map_err(|e| JobError::fatal(format!("bad kb_index payload: {e}")))?;

        match self.index(&payload, cancel).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut status = self
                    .store
                    .get_index_status(payload.source_type, &payload.source_id)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| {
                        KbIndexStatus::pending(payload.source_id.clone(), payload.source_type)
                    });
                status.fail(err.to_string());
                let _ = self.store.upsert_index_status(status).await;

                Err(job_error_from(err))
            }
        }
    }
}

fn job_error_from(err: KbError) -> JobError {
    match err.semantic_code() {
        Some(code) => JobError::semantic(code, err.to_string()),
        None => match err.kind() {
            farcast_core::ErrorKind::Integrity => JobError::fatal(err.to_string()),
            _ => JobError::retryable(err.to_string()),
        },
    }
}
