//! Chat memory repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{new_v7, ChatMemory, Error, MemoryType, NewMemory, Result};

/// PostgreSQL implementation of `MemoryRepository`.
#[derive(Clone)]
pub struct PgMemoryRepository {
    pool: Pool<Postgres>,
}

impl PgMemoryRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_memory(row: &sqlx::postgres::PgRow) -> ChatMemory {
        ChatMemory {
            id: row.get("id"),
            session_id: row.get("session_id"),
            memory_type: row.get("memory_type"),
            content: row.get("content"),
            importance_score: row.get("importance_score"),
            is_active: row.get("is_active"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl mnema_core::MemoryRepository for PgMemoryRepository {
    async fn insert_many(
        &self,
        session_id: Uuid,
        memories: &[NewMemory],
    ) -> Result<Vec<ChatMemory>> {
        let mut created = Vec::with_capacity(memories.len());
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for memory in memories {
            let clamped = memory.clone().clamped();
            let row = sqlx::query(
                "INSERT INTO chat_memories
                     (id, session_id, memory_type, content, importance_score, is_active,
                      metadata, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, true, '{}'::jsonb, now(), now())
                 RETURNING *",
            )
            .bind(new_v7())
            .bind(session_id)
            .bind(clamped.memory_type)
            .bind(&clamped.content)
            .bind(clamped.importance_score)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;

            created.push(Self::row_to_memory(&row));
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(created)
    }

    async fn active_for_session(&self, session_id: Uuid, limit: i64) -> Result<Vec<ChatMemory>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_memories
             WHERE session_id = $1 AND is_active
             ORDER BY importance_score DESC, created_at DESC
             LIMIT $2",
        )
        .bind(session_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_memory).collect())
    }

    async fn active_for_user(
        &self,
        user_id: Uuid,
        memory_type: MemoryType,
    ) -> Result<Vec<ChatMemory>> {
        let rows = sqlx::query(
            "SELECT m.* FROM chat_memories m
             JOIN chat_sessions s ON s.id = m.session_id
             WHERE s.user_id = $1 AND m.memory_type = $2 AND m.is_active
             ORDER BY m.importance_score DESC, m.created_at DESC",
        )
        .bind(user_id)
        .bind(memory_type)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_memory).collect())
    }

    async fn deactivate(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE chat_memories SET is_active = false, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
