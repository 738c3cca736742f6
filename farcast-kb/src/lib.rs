//! # farcast-kb: Knowledge Base Ingestion
//!
//! Turns upstream markdown documents into embedding-ready chunks:
//!
//! 1. **Chunking** — markdown cleaning, sentence-aware token-bounded
//!    windows with a trailing-sentence overlap, stable sha-256 content
//!    hashes ([`chunker`]).
//! 2. **Language detection** — statistical detection restricted to the
//!    station's supported languages ([`lang`]).
//! 3. **Embedding** — batched calls to the external embedding API behind a
//!    per-process content-hash LRU ([`embedding`]).
//! 4. **Indexing** — the `kb_index` job handler wiring the above into the
//!    knowledge store ([`indexer`]).

pub mod chunker;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod lang;
pub mod store;

pub use chunker::{chunk_markdown, clean_markdown, estimate_tokens, ChunkDraft, ChunkerConfig};
pub use embedding::{
    Embedded, EmbedRequest, EmbeddingApi, EmbeddingConfig, EmbeddingService, HttpEmbeddingApi,
    EMBEDDING_DIM,
};
pub use error::{KbError, KbResult};
pub use indexer::{KbIndexHandler, KbIndexJob, KB_INDEX_JOB};
pub use lang::{detect_language, LangDetection};
pub use store::{content_hash, KnowledgeStore, MemoryKnowledgeStore, ScoredChunk};
