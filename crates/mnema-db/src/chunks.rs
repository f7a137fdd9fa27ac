//! Chunk repository: persistence and cosine-similarity search.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{new_v7, ChunkSummary, Error, InsightChunk, RagChunk, Result};

/// PostgreSQL implementation of `ChunkRepository`.
#[derive(Clone)]
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_chunk(row: &sqlx::postgres::PgRow) -> InsightChunk {
        InsightChunk {
            id: row.get("id"),
            insight_id: row.get("insight_id"),
            chunk_index: row.get("chunk_index"),
            chunk_text: row.get("chunk_text"),
            chunk_size: row.get("chunk_size"),
            estimated_tokens: row.get("estimated_tokens"),
            chunk_method: row.get("chunk_method"),
            chunk_overlap: row.get("chunk_overlap"),
            embedding: row.get("embedding"),
            embedding_model: row.get("embedding_model"),
            embedding_tokens: row.get("embedding_tokens"),
            embedding_generated_at: row.get("embedding_generated_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl mnema_core::ChunkRepository for PgChunkRepository {
    async fn delete_for_insight(&self, insight_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM insight_chunks WHERE insight_id = $1")
            .bind(insight_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn insert_batch(&self, chunks: &[InsightChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for chunk in chunks {
            let id = if chunk.id.is_nil() { new_v7() } else { chunk.id };
            sqlx::query(
                "INSERT INTO insight_chunks
                     (id, insight_id, chunk_index, chunk_text, chunk_size, estimated_tokens,
                      chunk_method, chunk_overlap, embedding, embedding_model, embedding_tokens,
                      embedding_generated_at, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now())",
            )
            .bind(id)
            .bind(chunk.insight_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(chunk.chunk_size)
            .bind(chunk.estimated_tokens)
            .bind(&chunk.chunk_method)
            .bind(chunk.chunk_overlap)
            .bind(chunk.embedding.as_ref())
            .bind(&chunk.embedding_model)
            .bind(chunk.embedding_tokens)
            .bind(chunk.embedding_generated_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn get_for_insight(&self, insight_id: Uuid) -> Result<Vec<InsightChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM insight_chunks WHERE insight_id = $1 ORDER BY chunk_index",
        )
        .bind(insight_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn summary(&self, insight_id: Uuid) -> Result<ChunkSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_chunks,
                    COUNT(embedding) AS chunks_with_embedding,
                    COALESCE(SUM(estimated_tokens), 0)::bigint AS total_estimated_tokens,
                    MAX(chunk_method) AS chunk_method,
                    MAX(embedding_model) AS embedding_model
             FROM insight_chunks
             WHERE insight_id = $1",
        )
        .bind(insight_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(ChunkSummary {
            insight_id,
            total_chunks: row.get("total_chunks"),
            chunks_with_embedding: row.get("chunks_with_embedding"),
            total_estimated_tokens: row.get("total_estimated_tokens"),
            chunk_method: row.get("chunk_method"),
            embedding_model: row.get("embedding_model"),
        })
    }

    async fn find_similar(
        &self,
        user_id: Uuid,
        query_vec: &Vector,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RagChunk>> {
        if k == 0 || min_score > 1.0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id,
                   c.insight_id,
                   c.chunk_index,
                   c.chunk_text,
                   c.chunk_size,
                   (1.0 - (c.embedding <=> $2))::float4 AS score,
                   i.title AS insight_title,
                   i.url AS insight_url,
                   ct.summary AS insight_summary
            FROM insight_chunks c
            JOIN insights i ON i.id = c.insight_id
            LEFT JOIN insight_contents ct ON ct.insight_id = c.insight_id
            WHERE i.user_id = $1
              AND c.embedding IS NOT NULL
              AND (1.0 - (c.embedding <=> $2)) >= $3
            ORDER BY score DESC, c.insight_id ASC, c.chunk_index ASC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(query_vec)
        .bind(min_score as f64)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let score: f32 = row.get("score");
                RagChunk {
                    chunk_id: row.get("chunk_id"),
                    insight_id: row.get("insight_id"),
                    chunk_index: row.get("chunk_index"),
                    chunk_text: row.get("chunk_text"),
                    chunk_size: row.get("chunk_size"),
                    score: score.max(0.0),
                    insight_title: row.get("insight_title"),
                    insight_url: row.get("insight_url"),
                    insight_summary: row.get("insight_summary"),
                }
            })
            .collect())
    }
}
