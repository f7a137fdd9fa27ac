//! Chat storage: sessions, messages, and retrieval traces.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{
    new_v7, ChatMessage, ChatRagContextRecord, ChatSession, Error, MessageRole, Result,
};

/// PostgreSQL implementation of `ChatStore`.
#[derive(Clone)]
pub struct PgChatStore {
    pool: Pool<Postgres>,
}

impl PgChatStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> ChatSession {
        ChatSession {
            id: row.get("id"),
            user_id: row.get("user_id"),
            title: row.get("title"),
            is_active: row.get("is_active"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> ChatMessage {
        ChatMessage {
            id: row.get("id"),
            session_id: row.get("session_id"),
            role: row.get("role"),
            content: row.get("content"),
            metadata: row.get("metadata"),
            parent_message_id: row.get("parent_message_id"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl mnema_core::ChatStore for PgChatStore {
    async fn create_session(&self, user_id: Uuid, title: Option<&str>) -> Result<ChatSession> {
        let row = sqlx::query(
            "INSERT INTO chat_sessions (id, user_id, title, is_active, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, true, '{}'::jsonb, now(), now())
             RETURNING *",
        )
        .bind(new_v7())
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::row_to_session(&row))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::row_to_session))
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        page: i64,
        size: i64,
    ) -> Result<(Vec<ChatSession>, i64)> {
        let page = page.max(1);
        let size = size.clamp(1, 100);
        let offset = (page - 1) * size;

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM chat_sessions WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?
        .get("total");

        let rows = sqlx::query(
            "SELECT * FROM chat_sessions
             WHERE user_id = $1 AND is_active
             ORDER BY updated_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok((rows.iter().map(Self::row_to_session).collect(), total))
    }

    async fn update_session_title(&self, id: Uuid, title: &str) -> Result<()> {
        sqlx::query("UPDATE chat_sessions SET title = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn set_title_if_unset(&self, id: Uuid, title: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chat_sessions SET title = $2, updated_at = now()
             WHERE id = $1 AND title IS NULL",
        )
        .bind(id)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn deactivate_session(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET is_active = false, updated_at = now()
             WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::SessionNotFound(id));
        }
        Ok(())
    }

    async fn create_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: JsonValue,
    ) -> Result<ChatMessage> {
        let row = sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, now())
             RETURNING *",
        )
        .bind(new_v7())
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        // Keep the session's updated_at fresh so listings sort by activity.
        sqlx::query("UPDATE chat_sessions SET updated_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Self::row_to_message(&row))
    }

    async fn list_messages(&self, session_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn recent_messages(&self, session_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM (
                 SELECT * FROM chat_messages
                 WHERE session_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2
             ) recent ORDER BY created_at ASC",
        )
        .bind(session_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn create_rag_context(&self, record: &ChatRagContextRecord) -> Result<()> {
        let id = if record.id.is_nil() {
            new_v7()
        } else {
            record.id
        };

        sqlx::query(
            "INSERT INTO chat_rag_contexts
                 (id, message_id, rag_chunks, context_text, total_context_tokens,
                  extracted_keywords, rag_k, rag_min_score)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(id)
        .bind(record.message_id)
        .bind(&record.rag_chunks)
        .bind(&record.context_text)
        .bind(record.total_context_tokens)
        .bind(&record.extracted_keywords)
        .bind(record.rag_k)
        .bind(record.rag_min_score)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }
}
