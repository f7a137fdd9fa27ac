//! Tag repository: attachment and lookup for ingestion and digests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{new_v7, Error, Result, UserTag};

/// PostgreSQL implementation of `TagRepository`.
#[derive(Clone)]
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_tag(row: &sqlx::postgres::PgRow) -> UserTag {
        UserTag {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            color: row.get("color"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// `(insight_id, tag)` pairs for many insights in one query.
    pub async fn tags_for_insight_ids(&self, insight_ids: &[Uuid]) -> Result<Vec<(Uuid, UserTag)>> {
        if insight_ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            "SELECT it.insight_id, t.*
             FROM insight_tags it
             JOIN user_tags t ON t.id = it.tag_id
             WHERE it.insight_id = ANY($1)
             ORDER BY t.name",
        )
        .bind(insight_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| (row.get("insight_id"), Self::row_to_tag(row)))
            .collect())
    }
}

#[async_trait]
impl mnema_core::TagRepository for PgTagRepository {
    async fn attach(&self, insight_id: Uuid, user_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
        if tag_ids.is_empty() {
            return Ok(());
        }

        // Ownership gate: only the user's own tags attach.
        let owned: i64 = sqlx::query(
            "SELECT COUNT(*) AS owned FROM user_tags WHERE id = ANY($1) AND user_id = $2",
        )
        .bind(tag_ids)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?
        .get("owned");

        if owned as usize != tag_ids.len() {
            return Err(Error::Forbidden(
                "one or more tags do not belong to the caller".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for tag_id in tag_ids {
            sqlx::query(
                "INSERT INTO insight_tags (id, insight_id, tag_id, user_id, created_at)
                 VALUES ($1, $2, $3, $4, now())
                 ON CONFLICT (insight_id, tag_id) DO NOTHING",
            )
            .bind(new_v7())
            .bind(insight_id)
            .bind(tag_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        Ok(())
    }

    async fn tags_for_insight(&self, insight_id: Uuid) -> Result<Vec<UserTag>> {
        let rows = sqlx::query(
            "SELECT t.* FROM insight_tags it
             JOIN user_tags t ON t.id = it.tag_id
             WHERE it.insight_id = $1
             ORDER BY t.name",
        )
        .bind(insight_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_tag).collect())
    }

    async fn tags_for_insights(&self, insight_ids: &[Uuid]) -> Result<Vec<(Uuid, UserTag)>> {
        self.tags_for_insight_ids(insight_ids).await
    }
}
