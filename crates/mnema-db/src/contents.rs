//! Insight content repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{Error, InsightContent, Result};

/// PostgreSQL implementation of `ContentRepository`.
#[derive(Clone)]
pub struct PgContentRepository {
    pool: Pool<Postgres>,
}

impl PgContentRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl mnema_core::ContentRepository for PgContentRepository {
    async fn upsert(&self, content: &InsightContent) -> Result<()> {
        sqlx::query(
            "INSERT INTO insight_contents
                 (insight_id, user_id, url, html, text, markdown, summary, thought, content_type, extracted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (insight_id) DO UPDATE SET
                 url = EXCLUDED.url,
                 html = EXCLUDED.html,
                 text = EXCLUDED.text,
                 markdown = EXCLUDED.markdown,
                 summary = EXCLUDED.summary,
                 thought = EXCLUDED.thought,
                 content_type = EXCLUDED.content_type,
                 extracted_at = EXCLUDED.extracted_at",
        )
        .bind(content.insight_id)
        .bind(content.user_id)
        .bind(&content.url)
        .bind(&content.html)
        .bind(&content.text)
        .bind(&content.markdown)
        .bind(&content.summary)
        .bind(&content.thought)
        .bind(&content.content_type)
        .bind(content.extracted_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn get(&self, insight_id: Uuid) -> Result<Option<InsightContent>> {
        let row = sqlx::query("SELECT * FROM insight_contents WHERE insight_id = $1")
            .bind(insight_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|row| InsightContent {
            insight_id: row.get("insight_id"),
            user_id: row.get("user_id"),
            url: row.get("url"),
            html: row.get("html"),
            text: row.get("text"),
            markdown: row.get("markdown"),
            summary: row.get("summary"),
            thought: row.get("thought"),
            content_type: row.get("content_type"),
            extracted_at: row.get("extracted_at"),
        }))
    }
}
