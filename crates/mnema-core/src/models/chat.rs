//! Chat domain models: sessions, messages, retrieval traces, and memories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// SESSIONS & MESSAGES
// =============================================================================

/// A conversation container. Soft-deactivated rather than hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Auto-derived from the first user message when unset.
    pub title: Option<String>,
    pub is_active: bool,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Wire name, as stored and as sent to the LLM.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// One turn of a session. Messages of a session are totally ordered by
/// `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Token counts, model, latency.
    pub metadata: JsonValue,
    pub parent_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// `false` selects the single-JSON response variant.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

// =============================================================================
// RETRIEVAL TYPES
// =============================================================================

/// One retrieved chunk joined with its parent insight metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagChunk {
    pub chunk_id: Uuid,
    pub insight_id: Uuid,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub chunk_size: i32,
    /// Raw cosine similarity in [0, 1]; negatives clamp to 0.
    pub score: f32,
    pub insight_title: Option<String>,
    pub insight_url: String,
    pub insight_summary: Option<String>,
}

/// The citation-indexed context block handed to the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagContext {
    /// Chunks actually included, in citation order.
    pub chunks: Vec<RagChunk>,
    pub context_text: String,
    pub total_context_tokens: usize,
    /// Unique domain/title tokens, for audit logging.
    pub extracted_keywords: Vec<String>,
}

impl RagContext {
    /// Whether any retrieved context made it into the prompt.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Retrieval trace persisted for one assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRagContextRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub rag_chunks: JsonValue,
    pub context_text: String,
    pub total_context_tokens: i32,
    pub extracted_keywords: Vec<String>,
    pub rag_k: i32,
    pub rag_min_score: f32,
}

/// One cited source in the terminal `done` event: chunks merged per
/// parent insight, best score wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub insight_id: Uuid,
    pub score: f32,
    /// Citation index as shown in the answer (`[n]`).
    pub index: usize,
    pub title: Option<String>,
    pub url: String,
}

// =============================================================================
// MEMORIES
// =============================================================================

/// Kind of durable datum extracted from a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MemoryType {
    UserPreference,
    Fact,
    Context,
    Insight,
}

impl MemoryType {
    /// All types, in bucket order.
    pub const ALL: [MemoryType; 4] = [
        MemoryType::UserPreference,
        MemoryType::Fact,
        MemoryType::Context,
        MemoryType::Insight,
    ];

    /// Bucket name in the profile's memory document.
    pub fn bucket(&self) -> &'static str {
        match self {
            MemoryType::UserPreference => "preferences",
            MemoryType::Fact => "facts",
            MemoryType::Context => "context",
            MemoryType::Insight => "insights",
        }
    }
}

/// A durable datum extracted from a session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMemory {
    pub id: Uuid,
    pub session_id: Uuid,
    pub memory_type: MemoryType,
    pub content: String,
    /// Clamped to [0, 1] on creation.
    pub importance_score: f32,
    pub is_active: bool,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly extracted memory, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub importance_score: f32,
}

impl NewMemory {
    /// Clamp the importance score into [0, 1].
    pub fn clamped(mut self) -> Self {
        self.importance_score = self.importance_score.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for (role, s) in [
            (MessageRole::User, "\"user\""),
            (MessageRole::Assistant, "\"assistant\""),
            (MessageRole::System, "\"system\""),
        ] {
            assert_eq!(serde_json::to_string(&role).unwrap(), s);
            let parsed: MessageRole = serde_json::from_str(s).unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn test_memory_type_buckets() {
        assert_eq!(MemoryType::UserPreference.bucket(), "preferences");
        assert_eq!(MemoryType::Fact.bucket(), "facts");
        assert_eq!(MemoryType::Context.bucket(), "context");
        assert_eq!(MemoryType::Insight.bucket(), "insights");
    }

    #[test]
    fn test_memory_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&MemoryType::UserPreference).unwrap(),
            "\"user_preference\""
        );
    }

    #[test]
    fn test_new_memory_clamps_importance() {
        let mem = NewMemory {
            memory_type: MemoryType::Fact,
            content: "x".to_string(),
            importance_score: 1.7,
        }
        .clamped();
        assert_eq!(mem.importance_score, 1.0);

        let mem = NewMemory {
            memory_type: MemoryType::Fact,
            content: "x".to_string(),
            importance_score: -0.2,
        }
        .clamped();
        assert_eq!(mem.importance_score, 0.0);
    }

    #[test]
    fn test_chat_request_defaults_to_streaming() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert!(req.stream);
    }

    #[test]
    fn test_rag_context_default_is_empty() {
        assert!(RagContext::default().is_empty());
    }
}
