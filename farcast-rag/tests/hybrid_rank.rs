use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use farcast_core::{ChunkId, KbChunk, SourceDoc, SourceId, SourceType};
use farcast_kb::{
    content_hash, EmbeddingApi, EmbeddingConfig, EmbeddingService, KbResult, KnowledgeStore,
    MemoryKnowledgeStore,
};
use farcast_rag::{RagQuery, RetrievalConfig, RetrievalService};

/// Query embeddings are fixed so chunk similarity is fully controlled by
/// the stored chunk vectors.
struct UnitQueryApi;

#[async_trait]
impl EmbeddingApi for UnitQueryApi {
    async fn embed(&self, inputs: &[String]) -> KbResult<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
}

fn chunk(id: &str, source: &str, source_type: SourceType, text: &str) -> KbChunk {
    KbChunk {
        id: ChunkId::from(id),
        source_id: SourceId::from(source),
        source_type,
        chunk_text: text.to_string(),
        chunk_index: 0,
        token_count: 100,
        content_hash: content_hash(text),
        lang: "en".to_string(),
    }
}

async fn seeded_service() -> (RetrievalService, Arc<MemoryKnowledgeStore>) {
    let store = Arc::new(MemoryKnowledgeStore::new());

    // X: high vector, no keyword overlap.
    store
        .replace_chunks(
            SourceType::UniverseDoc,
            &SourceId::from("doc-x"),
            vec![chunk("x", "doc-x", SourceType::UniverseDoc, "orbital habitats and their gardens")],
        )
        .await
        .unwrap();
    store.put_embedding(&ChunkId::from("x"), vec![1.0, 0.0, 0.0, 0.0]).await.unwrap();

    // Y: below the vector threshold, full keyword overlap.
    store
        .replace_chunks(
            SourceType::UniverseDoc,
            &SourceId::from("doc-y"),
            vec![chunk(
                "y",
                "doc-y",
                SourceType::UniverseDoc,
                "the colony anniversary celebration parade route",
            )],
        )
        .await
        .unwrap();
    store.put_embedding(&ChunkId::from("y"), vec![0.0, 1.0, 0.0, 0.0]).await.unwrap();

    // Z: mid vector, half keyword overlap, attached to a dated event.
    store
        .put_source(SourceDoc {
            id: SourceId::from("event-z"),
            source_type: SourceType::Event,
            title: "Festival".to_string(),
            body_md: String::new(),
            lang: Some("en".to_string()),
            published_at: None,
            event_date: Some(Utc::now()),
        })
        .await
        .unwrap();
    store
        .replace_chunks(
            SourceType::Event,
            &SourceId::from("event-z"),
            vec![chunk("z", "event-z", SourceType::Event, "the colony anniversary approaches")],
        )
        .await
        .unwrap();
    store.put_embedding(&ChunkId::from("z"), vec![0.6, 0.8, 0.0, 0.0]).await.unwrap();

    let embedder = Arc::new(EmbeddingService::new(
        Arc::new(UnitQueryApi),
        EmbeddingConfig {
            dimension: 4,
            inter_batch_delay: Duration::from_millis(1),
            ..EmbeddingConfig::default()
        },
    ));
    let service = RetrievalService::new(store.clone(), embedder, RetrievalConfig::default());
    (service, store)
}

const QUERY: &str = "colony anniversary celebration parade";

#[tokio::test]
async fn fused_order_follows_the_weighted_sum() {
    let (service, _store) = seeded_service().await;

    let retrieval = service.retrieve(&RagQuery::text(QUERY)).await.unwrap();
    let ids: Vec<&str> = retrieval.chunks.iter().map(|c| c.chunk_id.as_str()).collect();

    // X: 0.7*1.0 = 0.70; Z: 0.7*0.6 + 0.3*0.5 = 0.57; Y: 0.3*1.0 = 0.30.
    assert_eq!(ids, vec!["x", "z", "y"]);

    let x = &retrieval.chunks[0];
    assert!((x.final_score - 0.7).abs() < 1e-3);
    assert_eq!(x.lexical_score, 0.0);

    let z = &retrieval.chunks[1];
    assert!((z.vector_score - 0.6).abs() < 1e-3);
    assert!((z.lexical_score - 0.5).abs() < 1e-3);
    assert!((z.final_score - 0.57).abs() < 1e-3);

    let y = &retrieval.chunks[2];
    assert_eq!(y.vector_score, 0.0);
    assert!((y.lexical_score - 1.0).abs() < 1e-6);

    assert_eq!(retrieval.total_results, 3);
}

#[tokio::test]
async fn recency_boost_lifts_adjacent_events() {
    let (service, _store) = seeded_service().await;

    let query = RagQuery {
        recency_boost: true,
        reference_time: Some(Utc::now()),
        ..RagQuery::text(QUERY)
    };
    let retrieval = service.retrieve(&query).await.unwrap();
    let ids: Vec<&str> = retrieval.chunks.iter().map(|c| c.chunk_id.as_str()).collect();

    // Z is an event adjacent to the reference time: 0.57 * 1.3 = 0.741,
    // moving it above X. Non-event chunks are untouched.
    assert_eq!(ids, vec!["z", "x", "y"]);
    let z = &retrieval.chunks[0];
    assert!((z.recency_score - 0.3).abs() < 1e-3);
    assert!((z.final_score - 0.741).abs() < 1e-3);
    assert_eq!(retrieval.chunks[1].recency_score, 0.0);
}

#[tokio::test]
async fn source_type_filter_restricts_both_legs() {
    let (service, _store) = seeded_service().await;

    let query = RagQuery {
        source_types: Some(vec![SourceType::Event]),
        ..RagQuery::text(QUERY)
    };
    let retrieval = service.retrieve(&query).await.unwrap();
    assert_eq!(retrieval.chunks.len(), 1);
    assert_eq!(retrieval.chunks[0].chunk_id.as_str(), "z");
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let (service, _store) = seeded_service().await;
    let err = service.retrieve(&RagQuery::text("   ")).await.unwrap_err();
    assert!(matches!(err, farcast_rag::RagError::EmptyQuery));
}

#[tokio::test]
async fn top_k_caps_the_result() {
    let (service, _store) = seeded_service().await;
    let query = RagQuery {
        top_k: Some(1),
        ..RagQuery::text(QUERY)
    };
    let retrieval = service.retrieve(&query).await.unwrap();
    assert_eq!(retrieval.chunks.len(), 1);
    assert_eq!(retrieval.total_results, 3);
    assert_eq!(retrieval.chunks[0].chunk_id.as_str(), "x");
}
