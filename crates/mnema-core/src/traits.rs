//! Trait definitions shared across mnema crates.
//!
//! Repository traits are declared here and implemented by `mnema-db`;
//! inference backend traits are implemented by `mnema-inference` (and by
//! test mocks). Service crates depend only on these seams.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::Stream;
use pgvector::Vector;
use serde_json::Value as JsonValue;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ChatMemory, ChatMessage, ChatRagContextRecord, ChatSession, ChunkSummary, EmailDigest,
    EmailPreferences, Insight, InsightChunk, InsightContent, ListInsightsRequest,
    ListInsightsResponse, MemoryProfile, MemoryType, MessageRole, NewMemory, Profile, RagChunk,
    UpdateEmailPreferences, UpdateInsightRequest, UserTag,
};

// =============================================================================
// INFERENCE BACKENDS
// =============================================================================

/// One message of a completion prompt.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A completed (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// One delta of a streaming generation.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A piece of assistant text, in upstream order.
    Content(String),
    /// Terminal usage report, when the provider sends one.
    Done(TokenUsage),
}

/// Stream of generation deltas.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Dense-embedding provider.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, returning vectors in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vector> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::Error::Embedding("empty embedding response".to_string()))
    }

    /// Expected vector dimension.
    fn dimension(&self) -> usize;

    /// Model identifier recorded on persisted chunks.
    fn model_name(&self) -> &str;
}

/// Chat-completion provider.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run a blocking completion over the given messages.
    async fn generate(&self, messages: &[PromptMessage]) -> Result<Completion>;

    /// Model identifier recorded on message metadata.
    fn model_name(&self) -> &str;
}

/// Streaming extension of [`GenerationBackend`].
#[async_trait]
pub trait StreamingGeneration: Send + Sync {
    /// Start a streaming completion; deltas arrive in upstream order.
    async fn generate_stream(&self, messages: &[PromptMessage]) -> Result<TokenStream>;
}

// =============================================================================
// INSIGHT REPOSITORIES
// =============================================================================

/// Persistence for insights.
#[async_trait]
pub trait InsightRepository: Send + Sync {
    /// Insert a skeleton row; returns the generated id.
    async fn insert(&self, insight: &Insight) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Option<Insight>>;

    /// Fetch and verify ownership in one step.
    async fn get_owned(&self, id: Uuid, user_id: Uuid) -> Result<Insight>;

    async fn list(&self, req: &ListInsightsRequest) -> Result<ListInsightsResponse>;

    /// Every insight of a user, newest first.
    async fn list_all(&self, user_id: Uuid) -> Result<Vec<Insight>>;

    /// Insights created or updated since the watermark (inclusive overlap
    /// intended: matches the digest window semantics).
    async fn changed_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<Insight>>;

    /// Corpus watermark for ETag computation: `(max updated_at, count)`.
    async fn sync_watermark(&self, user_id: Uuid) -> Result<(Option<DateTime<Utc>>, i64)>;

    async fn update(&self, id: Uuid, user_id: Uuid, req: &UpdateInsightRequest) -> Result<Insight>;

    /// Apply extracted metadata from the ingestion pipeline. User-provided
    /// fields are never overwritten.
    async fn update_extracted_metadata(
        &self,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<()>;

    /// Delete; cascades to contents, chunks, and tag links.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<()>;

    /// Insights of a user created or updated inside a window, with tags
    /// joined (digest input).
    async fn window_with_tags(
        &self,
        user_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<(Insight, Vec<UserTag>)>>;
}

/// Persistence for extracted contents (1:1 with insights).
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Upsert keyed by `insight_id`.
    async fn upsert(&self, content: &InsightContent) -> Result<()>;

    async fn get(&self, insight_id: Uuid) -> Result<Option<InsightContent>>;
}

/// Persistence and similarity search for chunks.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Delete all chunks of an insight (re-ingest idempotency).
    async fn delete_for_insight(&self, insight_id: Uuid) -> Result<u64>;

    /// Insert a batch of chunks; `(insight_id, chunk_index)` must be fresh.
    async fn insert_batch(&self, chunks: &[InsightChunk]) -> Result<()>;

    async fn get_for_insight(&self, insight_id: Uuid) -> Result<Vec<InsightChunk>>;

    /// Aggregate chunk/embedding counts for one insight.
    async fn summary(&self, insight_id: Uuid) -> Result<ChunkSummary>;

    /// Cosine-similarity search over one user's embedded chunks, parent
    /// insight metadata joined in. Results sorted by descending score,
    /// ties broken by `(insight_id, chunk_index)` ascending.
    async fn find_similar(
        &self,
        user_id: Uuid,
        query_vec: &Vector,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RagChunk>>;
}

/// Tag attachment for ingestion and the digest's tag grouping.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Attach tags to an insight. Tags not owned by `user_id` are rejected.
    async fn attach(&self, insight_id: Uuid, user_id: Uuid, tag_ids: &[Uuid]) -> Result<()>;

    async fn tags_for_insight(&self, insight_id: Uuid) -> Result<Vec<UserTag>>;

    /// Bulk-load tags for many insights: `(insight_id, tag)` pairs.
    async fn tags_for_insights(&self, insight_ids: &[Uuid]) -> Result<Vec<(Uuid, UserTag)>>;
}

// =============================================================================
// CHAT REPOSITORIES
// =============================================================================

/// Session, message, and retrieval-trace persistence.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_session(&self, user_id: Uuid, title: Option<&str>) -> Result<ChatSession>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>>;

    async fn list_sessions(
        &self,
        user_id: Uuid,
        page: i64,
        size: i64,
    ) -> Result<(Vec<ChatSession>, i64)>;

    async fn update_session_title(&self, id: Uuid, title: &str) -> Result<()>;

    /// Derive-and-set title only when currently unset.
    async fn set_title_if_unset(&self, id: Uuid, title: &str) -> Result<()>;

    /// Soft-delete: flips `is_active`.
    async fn deactivate_session(&self, id: Uuid, user_id: Uuid) -> Result<()>;

    async fn create_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: JsonValue,
    ) -> Result<ChatMessage>;

    /// Messages of a session, oldest first, capped at `limit`.
    async fn list_messages(&self, session_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>>;

    /// The most recent `limit` messages, returned oldest first.
    async fn recent_messages(&self, session_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>>;

    async fn create_rag_context(&self, record: &ChatRagContextRecord) -> Result<()>;
}

/// Memory persistence.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn insert_many(&self, session_id: Uuid, memories: &[NewMemory]) -> Result<Vec<ChatMemory>>;

    /// Active memories of one session, by importance descending.
    async fn active_for_session(&self, session_id: Uuid, limit: i64) -> Result<Vec<ChatMemory>>;

    /// Active memories across all of a user's sessions for one type.
    async fn active_for_user(
        &self,
        user_id: Uuid,
        memory_type: MemoryType,
    ) -> Result<Vec<ChatMemory>>;

    /// Deactivate rows subsumed by consolidation.
    async fn deactivate(&self, ids: &[Uuid]) -> Result<u64>;
}

/// Profile persistence.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<Profile>>;

    /// Replace the memory document.
    async fn save_memory_profile(&self, user_id: Uuid, profile: &MemoryProfile) -> Result<()>;
}

// =============================================================================
// EMAIL REPOSITORIES
// =============================================================================

/// A digest candidate: preferences joined with identity and activity.
#[derive(Debug, Clone)]
pub struct DigestCandidate {
    pub user_id: Uuid,
    pub email: String,
    pub nickname: Option<String>,
    pub preferences: EmailPreferences,
    pub has_insights: bool,
}

/// Digest audit, preference, and suppression persistence.
#[async_trait]
pub trait EmailRepository: Send + Sync {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<EmailPreferences>>;

    /// Create-with-defaults when absent, then apply the patch.
    async fn upsert_preferences(
        &self,
        user_id: Uuid,
        update: &UpdateEmailPreferences,
    ) -> Result<EmailPreferences>;

    /// All users with digest preferences, for the cron sweep.
    async fn digest_candidates(&self) -> Result<Vec<DigestCandidate>>;

    /// CAS insert of the audit row. Returns the row, and whether this call
    /// created it (`false` means it already existed).
    async fn begin_digest(&self, user_id: Uuid, week_start: NaiveDate)
        -> Result<(EmailDigest, bool)>;

    async fn get_digest(&self, user_id: Uuid, week_start: NaiveDate)
        -> Result<Option<EmailDigest>>;

    async fn mark_digest_sent(
        &self,
        id: Uuid,
        message_id: &str,
        payload: &JsonValue,
    ) -> Result<()>;

    async fn mark_digest_failed(&self, id: Uuid, error: &str) -> Result<()>;

    /// Reset a failed row to queued for a retry sweep.
    async fn requeue_digest(&self, id: Uuid) -> Result<()>;

    async fn record_event(
        &self,
        message_id: &str,
        event: &str,
        email: Option<&str>,
        payload: &JsonValue,
        occurred_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn add_suppression(&self, email: &str, reason: &str) -> Result<()>;

    async fn is_suppressed(&self, email: &str) -> Result<bool>;

    async fn get_or_create_unsubscribe_token(&self, user_id: Uuid) -> Result<String>;

    /// Resolve a token to its user; used by the unsubscribe landing.
    async fn resolve_unsubscribe_token(&self, token: &str) -> Result<Option<Uuid>>;

    /// Flip `weekly_digest_enabled` off.
    async fn disable_digest(&self, user_id: Uuid) -> Result<()>;

    /// Digest status counts for one user (test/debug surface).
    async fn digest_history(&self, user_id: Uuid, limit: i64) -> Result<Vec<EmailDigest>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_message_constructors() {
        assert_eq!(PromptMessage::system("s").role, MessageRole::System);
        assert_eq!(PromptMessage::user("u").role, MessageRole::User);
        assert_eq!(PromptMessage::assistant("a").role, MessageRole::Assistant);
    }

    #[test]
    fn test_token_usage_default_zero() {
        let usage = TokenUsage::default();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
    }
}
