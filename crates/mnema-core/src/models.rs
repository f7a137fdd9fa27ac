//! Core data models for mnema.
//!
//! These types are shared across all mnema crates and represent the core
//! domain entities: insights (saved URLs), their extracted contents and
//! retrieval chunks, and tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub mod chat;
pub mod email;
pub mod profile;

pub use chat::*;
pub use email::*;
pub use profile::*;

// =============================================================================
// INSIGHT TYPES
// =============================================================================

/// A user-owned bookmarked URL with extracted metadata.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Insight {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// User's own note attached at save time.
    pub thought: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insight enriched with its tags, as returned by list/detail endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightWithTags {
    #[serde(flatten)]
    pub insight: Insight,
    #[serde(default)]
    pub tags: Vec<UserTag>,
}

/// Extracted article body and generated summary, 1:1 with an insight.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InsightContent {
    pub insight_id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub html: Option<String>,
    /// Preprocessed body — the key-paragraph selection, not the raw article.
    pub text: Option<String>,
    pub markdown: Option<String>,
    pub summary: Option<String>,
    pub thought: Option<String>,
    pub content_type: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
}

/// One atomic retrieval unit of an insight's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightChunk {
    pub id: Uuid,
    pub insight_id: Uuid,
    pub chunk_index: i32,
    pub chunk_text: String,
    /// Character count of `chunk_text`.
    pub chunk_size: i32,
    pub estimated_tokens: i32,
    pub chunk_method: String,
    pub chunk_overlap: i32,
    /// None while the embedding is pending or permanently failed;
    /// such chunks are invisible to retrieval.
    #[serde(skip)]
    pub embedding: Option<pgvector::Vector>,
    pub embedding_model: Option<String>,
    pub embedding_tokens: Option<i32>,
    pub embedding_generated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate chunk/embedding status for one insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub insight_id: Uuid,
    pub total_chunks: i64,
    pub chunks_with_embedding: i64,
    pub total_estimated_tokens: i64,
    pub chunk_method: Option<String>,
    pub embedding_model: Option<String>,
}

// =============================================================================
// TAG TYPES
// =============================================================================

/// A named colored label owned by a user. `(user_id, name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserTag {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Hex color, e.g. `#7c5cff`.
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insight ↔ tag association. `user_id` is denormalized for row-level
/// access checks.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InsightTag {
    pub id: Uuid,
    pub insight_id: Uuid,
    pub tag_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

/// Request body for `POST /api/v1/insights`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInsightRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub tag_ids: Option<Vec<Uuid>>,
}

/// Request body for `PUT /api/v1/insights/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateInsightRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub tag_ids: Option<Vec<Uuid>>,
}

/// Query for paginated insight listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInsightsRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    crate::defaults::PAGE_LIMIT
}

/// Pagination block for list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    /// Build from a total row count and the request's page/limit.
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 {
            (total + limit - 1) / limit
        } else {
            0
        };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// Response body for paginated insight listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInsightsResponse {
    pub insights: Vec<InsightWithTags>,
    pub pagination: Pagination,
}

/// Incremental-sync response: insights changed since a watermark plus the
/// corpus ETag. An unchanged corpus yields an empty list and the same ETag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalSyncResponse {
    pub insights: Vec<InsightWithTags>,
    pub etag: String,
}

/// Metadata preview returned by `POST /api/v1/metadata/extract`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Degradations an ingestion run can survive. The orchestrator decides
/// which of these still produce a persisted insight (all of them do; they
/// only limit how much derived data exists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestionDegradation {
    /// Page fetch failed; only user-provided fields persisted.
    FetchFailed(String),
    /// Fetch succeeded but extraction produced no usable body.
    ExtractionEmpty,
    /// Summary generation failed; contents persisted without a summary.
    SummaryFailed(String),
    /// Some chunk embeddings failed; affected chunks stored with null
    /// embeddings.
    EmbeddingPartial { failed_chunks: usize },
}

/// Outcome of one background ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub insight_id: Uuid,
    pub chunks_persisted: usize,
    pub chunks_embedded: usize,
    pub summary_cached: bool,
    #[serde(default)]
    pub degradations: Vec<IngestionDegradation>,
}

impl IngestionReport {
    /// Whether the run completed without any degradation.
    pub fn is_clean(&self) -> bool {
        self.degradations.is_empty()
    }
}

/// Generic error envelope for JSON endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub detail: String,
}

/// Free-form metadata column wrapper kept as raw JSON.
pub type Metadata = JsonValue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_exact_pages() {
        let p = Pagination::new(1, 20, 40);
        assert_eq!(p.total_pages, 2);
    }

    #[test]
    fn test_pagination_partial_last_page() {
        let p = Pagination::new(2, 20, 41);
        assert_eq!(p.total_pages, 3);
    }

    #[test]
    fn test_pagination_zero_total() {
        let p = Pagination::new(1, 20, 0);
        assert_eq!(p.total_pages, 0);
    }

    #[test]
    fn test_pagination_zero_limit_does_not_divide_by_zero() {
        let p = Pagination::new(1, 0, 10);
        assert_eq!(p.total_pages, 0);
    }

    #[test]
    fn test_create_request_minimal_json() {
        let req: CreateInsightRequest =
            serde_json::from_str(r#"{"url":"https://example.com/a"}"#).unwrap();
        assert_eq!(req.url, "https://example.com/a");
        assert!(req.thought.is_none());
        assert!(req.tag_ids.is_none());
    }

    #[test]
    fn test_ingestion_report_clean() {
        let report = IngestionReport {
            insight_id: Uuid::nil(),
            chunks_persisted: 3,
            chunks_embedded: 3,
            summary_cached: false,
            degradations: vec![],
        };
        assert!(report.is_clean());
    }

    #[test]
    fn test_ingestion_report_degraded() {
        let report = IngestionReport {
            insight_id: Uuid::nil(),
            chunks_persisted: 3,
            chunks_embedded: 1,
            summary_cached: false,
            degradations: vec![IngestionDegradation::EmbeddingPartial { failed_chunks: 2 }],
        };
        assert!(!report.is_clean());
    }

    #[test]
    fn test_insight_with_tags_flattens() {
        let insight = Insight {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            url: "https://example.com".to_string(),
            title: Some("Example".to_string()),
            description: None,
            image_url: None,
            thought: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let with_tags = InsightWithTags {
            insight,
            tags: vec![],
        };
        let json = serde_json::to_value(&with_tags).unwrap();
        assert_eq!(json["url"], "https://example.com");
        assert!(json.get("insight").is_none());
    }
}
