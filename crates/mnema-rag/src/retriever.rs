//! Query-time chunk retrieval.
//!
//! Embeds the query and runs a cosine search over the caller's embedded
//! chunks. Fail-closed: an embedding failure returns an empty result so
//! the chat engine can degrade to a no-context prompt instead of erroring
//! the turn.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use mnema_core::{defaults, ChunkRepository, EmbeddingBackend, RagChunk, Result};

/// Retrieval parameters for one search.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub k: usize,
    pub min_score: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: defaults::RAG_DEFAULT_K,
            min_score: defaults::RAG_DEFAULT_MIN_SCORE,
        }
    }
}

impl RetrievalParams {
    /// Read `RAG_DEFAULT_K` / `RAG_DEFAULT_MIN_SCORE` overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            k: std::env::var("RAG_DEFAULT_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.k),
            min_score: std::env::var("RAG_DEFAULT_MIN_SCORE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_score),
        }
    }
}

/// Chunk retriever over one user's corpus.
pub struct Retriever {
    chunks: Arc<dyn ChunkRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
}

impl Retriever {
    pub fn new(chunks: Arc<dyn ChunkRepository>, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self { chunks, embedder }
    }

    /// Retrieve the top chunks for a query. Returns an empty list for
    /// `k == 0`, `min_score > 1.0`, or any embedding failure.
    pub async fn search(
        &self,
        query: &str,
        user_id: Uuid,
        params: RetrievalParams,
    ) -> Result<Vec<RagChunk>> {
        if params.k == 0 || params.min_score > 1.0 || query.trim().is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();

        let query_vec = match self.embedder.embed_text(query).await {
            Ok(vec) => vec,
            Err(e) => {
                warn!(
                    subsystem = "rag",
                    component = "retriever",
                    user_id = %user_id,
                    error = %e,
                    "Query embedding failed, retrieval degrades to empty"
                );
                return Ok(vec![]);
            }
        };

        let results = self
            .chunks
            .find_similar(user_id, &query_vec, params.k, params.min_score)
            .await?;

        debug!(
            subsystem = "rag",
            component = "retriever",
            op = "search",
            user_id = %user_id,
            rag_k = params.k,
            rag_min_score = params.min_score,
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mnema_core::{ChunkSummary, InsightChunk};
    use mnema_inference::MockBackend;
    use pgvector::Vector;

    struct StubChunks {
        results: Vec<RagChunk>,
    }

    #[async_trait]
    impl ChunkRepository for StubChunks {
        async fn delete_for_insight(&self, _: Uuid) -> Result<u64> {
            Ok(0)
        }
        async fn insert_batch(&self, _: &[InsightChunk]) -> Result<()> {
            Ok(())
        }
        async fn get_for_insight(&self, _: Uuid) -> Result<Vec<InsightChunk>> {
            Ok(vec![])
        }
        async fn summary(&self, insight_id: Uuid) -> Result<ChunkSummary> {
            Ok(ChunkSummary {
                insight_id,
                total_chunks: 0,
                chunks_with_embedding: 0,
                total_estimated_tokens: 0,
                chunk_method: None,
                embedding_model: None,
            })
        }
        async fn find_similar(
            &self,
            _: Uuid,
            _: &Vector,
            k: usize,
            _: f32,
        ) -> Result<Vec<RagChunk>> {
            Ok(self.results.iter().take(k).cloned().collect())
        }
    }

    fn chunk(score: f32) -> RagChunk {
        RagChunk {
            chunk_id: Uuid::new_v4(),
            insight_id: Uuid::new_v4(),
            chunk_index: 0,
            chunk_text: "attention mechanisms weigh token relevance".to_string(),
            chunk_size: 42,
            score,
            insight_title: Some("Transformers".to_string()),
            insight_url: "https://example.com/transformers".to_string(),
            insight_summary: None,
        }
    }

    #[tokio::test]
    async fn test_search_returns_repository_hits() {
        let retriever = Retriever::new(
            Arc::new(StubChunks {
                results: vec![chunk(0.9), chunk(0.5)],
            }),
            Arc::new(MockBackend::new("")),
        );
        let hits = retriever
            .search("attention", Uuid::new_v4(), RetrievalParams::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_k_zero_short_circuits() {
        let retriever = Retriever::new(
            Arc::new(StubChunks {
                results: vec![chunk(0.9)],
            }),
            Arc::new(MockBackend::new("")),
        );
        let hits = retriever
            .search(
                "attention",
                Uuid::new_v4(),
                RetrievalParams { k: 0, min_score: 0.2 },
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_impossible_min_score_short_circuits() {
        let retriever = Retriever::new(
            Arc::new(StubChunks {
                results: vec![chunk(0.9)],
            }),
            Arc::new(MockBackend::new("")),
        );
        let hits = retriever
            .search(
                "attention",
                Uuid::new_v4(),
                RetrievalParams { k: 6, min_score: 1.5 },
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_fails_closed_on_embedding_error() {
        let retriever = Retriever::new(
            Arc::new(StubChunks {
                results: vec![chunk(0.9)],
            }),
            Arc::new(MockBackend::failing()),
        );
        let hits = retriever
            .search("attention", Uuid::new_v4(), RetrievalParams::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_query_short_circuits() {
        let retriever = Retriever::new(
            Arc::new(StubChunks {
                results: vec![chunk(0.9)],
            }),
            Arc::new(MockBackend::new("")),
        );
        let hits = retriever
            .search("   ", Uuid::new_v4(), RetrievalParams::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
