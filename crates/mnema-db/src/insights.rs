//! Insight repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{
    defaults, new_v7, Error, Insight, InsightWithTags, ListInsightsRequest, ListInsightsResponse,
    Pagination, Result, UpdateInsightRequest, UserTag,
};

use crate::escape_like;
use crate::tags::PgTagRepository;

/// PostgreSQL implementation of `InsightRepository`.
#[derive(Clone)]
pub struct PgInsightRepository {
    pool: Pool<Postgres>,
}

impl PgInsightRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_insight(row: &sqlx::postgres::PgRow) -> Insight {
        Insight {
            id: row.get("id"),
            user_id: row.get("user_id"),
            url: row.get("url"),
            title: row.get("title"),
            description: row.get("description"),
            image_url: row.get("image_url"),
            thought: row.get("thought"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Join tags onto a page of insights in one query.
    async fn attach_tags(&self, insights: Vec<Insight>) -> Result<Vec<InsightWithTags>> {
        let ids: Vec<Uuid> = insights.iter().map(|i| i.id).collect();
        let tag_repo = PgTagRepository::new(self.pool.clone());
        let pairs = tag_repo.tags_for_insight_ids(&ids).await?;

        let mut by_insight: std::collections::HashMap<Uuid, Vec<UserTag>> =
            std::collections::HashMap::new();
        for (insight_id, tag) in pairs {
            by_insight.entry(insight_id).or_default().push(tag);
        }

        Ok(insights
            .into_iter()
            .map(|insight| {
                let tags = by_insight.remove(&insight.id).unwrap_or_default();
                InsightWithTags { insight, tags }
            })
            .collect())
    }

    /// Weak ETag over the corpus watermark: user, newest update, row count.
    pub fn compute_etag(user_id: Uuid, max_updated: Option<DateTime<Utc>>, count: i64) -> String {
        let watermark = max_updated
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_else(|| "0".to_string());
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", user_id, watermark, count).as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl mnema_core::InsightRepository for PgInsightRepository {
    async fn insert(&self, insight: &Insight) -> Result<Uuid> {
        let id = if insight.id.is_nil() {
            new_v7()
        } else {
            insight.id
        };

        sqlx::query(
            "INSERT INTO insights (id, user_id, url, title, description, image_url, thought, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())",
        )
        .bind(id)
        .bind(insight.user_id)
        .bind(&insight.url)
        .bind(&insight.title)
        .bind(&insight.description)
        .bind(&insight.image_url)
        .bind(&insight.thought)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Insight>> {
        let row = sqlx::query("SELECT * FROM insights WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::row_to_insight))
    }

    async fn get_owned(&self, id: Uuid, user_id: Uuid) -> Result<Insight> {
        let insight = self.get(id).await?.ok_or(Error::InsightNotFound(id))?;
        if insight.user_id != user_id {
            return Err(Error::Forbidden(format!(
                "insight {} does not belong to the caller",
                id
            )));
        }
        Ok(insight)
    }

    async fn list(&self, req: &ListInsightsRequest) -> Result<ListInsightsResponse> {
        let page = req.page.max(1);
        let limit = req.limit.clamp(1, 100);
        let offset = (page - 1) * limit;

        let (where_search, pattern) = match &req.search {
            Some(s) if !s.trim().is_empty() => (
                "AND (title ILIKE $2 OR description ILIKE $2 OR url ILIKE $2 OR thought ILIKE $2)",
                Some(format!("%{}%", escape_like(s.trim()))),
            ),
            _ => ("", None),
        };

        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM insights WHERE user_id = $1 {}",
            where_search
        );
        let mut count_query = sqlx::query(&count_sql).bind(req.user_id);
        if let Some(ref p) = pattern {
            count_query = count_query.bind(p);
        }
        let total: i64 = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?
            .get("total");

        let list_sql = format!(
            "SELECT * FROM insights WHERE user_id = $1 {} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            where_search, limit, offset
        );
        let mut list_query = sqlx::query(&list_sql).bind(req.user_id);
        if let Some(ref p) = pattern {
            list_query = list_query.bind(p);
        }
        let rows = list_query
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let insights = rows.iter().map(Self::row_to_insight).collect();
        let insights = self.attach_tags(insights).await?;

        Ok(ListInsightsResponse {
            insights,
            pagination: Pagination::new(page, limit, total),
        })
    }

    async fn list_all(&self, user_id: Uuid) -> Result<Vec<Insight>> {
        let rows = sqlx::query(
            "SELECT * FROM insights WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_insight).collect())
    }

    async fn changed_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Insight>> {
        let rows = sqlx::query(
            "SELECT * FROM insights
             WHERE user_id = $1 AND (created_at >= $2 OR updated_at >= $2)
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_insight).collect())
    }

    async fn sync_watermark(&self, user_id: Uuid) -> Result<(Option<DateTime<Utc>>, i64)> {
        let row = sqlx::query(
            "SELECT MAX(updated_at) AS max_updated, COUNT(*) AS total
             FROM insights WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok((row.get("max_updated"), row.get("total")))
    }

    async fn update(&self, id: Uuid, user_id: Uuid, req: &UpdateInsightRequest) -> Result<Insight> {
        // Ownership check first so a foreign id yields 403, not 404-by-filter.
        self.get_owned(id, user_id).await?;

        if let Some(ref thought) = req.thought {
            if thought.chars().count() > defaults::THOUGHT_MAX_CHARS {
                return Err(Error::Validation(format!(
                    "thought exceeds {} characters",
                    defaults::THOUGHT_MAX_CHARS
                )));
            }
        }

        let row = sqlx::query(
            "UPDATE insights SET
                 title = COALESCE($3, title),
                 description = COALESCE($4, description),
                 image_url = COALESCE($5, image_url),
                 thought = COALESCE($6, thought),
                 updated_at = CASE
                     WHEN COALESCE($3, title) IS NOT DISTINCT FROM title
                      AND COALESCE($4, description) IS NOT DISTINCT FROM description
                      AND COALESCE($5, image_url) IS NOT DISTINCT FROM image_url
                      AND COALESCE($6, thought) IS NOT DISTINCT FROM thought
                     THEN updated_at ELSE now() END
             WHERE id = $1 AND user_id = $2
             RETURNING *",
        )
        .bind(id)
        .bind(user_id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.image_url)
        .bind(&req.thought)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::row_to_insight(&row))
    }

    async fn update_extracted_metadata(
        &self,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<()> {
        // COALESCE order keeps user-provided values: extracted metadata only
        // fills fields that are still NULL.
        sqlx::query(
            "UPDATE insights SET
                 title = COALESCE(title, $2),
                 description = COALESCE(description, $3),
                 image_url = COALESCE(image_url, $4),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(image_url)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM insights WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::InsightNotFound(id));
        }
        Ok(())
    }

    async fn window_with_tags(
        &self,
        user_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<(Insight, Vec<UserTag>)>> {
        let rows = sqlx::query(
            "SELECT * FROM insights
             WHERE user_id = $1
               AND (created_at >= $2 OR updated_at >= $2)
               AND created_at < $3
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let insights: Vec<Insight> = rows.iter().map(Self::row_to_insight).collect();
        let with_tags = self.attach_tags(insights).await?;

        Ok(with_tags
            .into_iter()
            .map(|iwt| (iwt.insight, iwt.tags))
            .collect())
    }
}
