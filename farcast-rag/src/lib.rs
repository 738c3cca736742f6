//! # farcast-rag: Hybrid Retrieval Core
//!
//! Ranks knowledge-base chunks for script generation by fusing three
//! signals:
//!
//! - **Vector** — cosine similarity between the query embedding and chunk
//!   embeddings,
//! - **Lexical** — fraction of query keywords present in the chunk text,
//! - **Recency** — a deterministic decay boost for event sources near the
//!   segment's in-universe broadcast date.
//!
//! Queries are synthesized per slot type from templates filled with the
//! station's fictional calendar ([`query`]), so retrieval relevance tracks
//! broadcast time rather than wall clock.

pub mod error;
pub mod query;
pub mod retrieval;

pub use error::{RagError, RagResult};
pub use query::{QueryBuilder, QueryTemplates};
pub use retrieval::{
    recency_score, RagChunk, RagQuery, RagRetrieval, RetrievalConfig, RetrievalService,
};
