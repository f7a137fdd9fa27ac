//! Post-turn memory extraction.
//!
//! After an assistant response persists, the extractor reads the recent
//! conversation tail and asks the model for durable memories. Failures
//! here never surface to the user — the turn already completed.

use std::sync::Arc;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use mnema_core::{
    defaults, ChatMessage, GenerationBackend, MemoryRepository, MemoryType, NewMemory,
    PromptMessage, Result,
};

use crate::prompts::MEMORY_EXTRACT_PROMPT;

#[derive(Debug, Deserialize)]
struct ExtractedMemories {
    #[serde(default)]
    memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    #[serde(rename = "type")]
    memory_type: String,
    content: String,
    #[serde(default)]
    importance: f32,
}

/// Conversation → memory extractor.
pub struct MemoryExtractor {
    generator: Arc<dyn GenerationBackend>,
}

impl MemoryExtractor {
    pub fn new(generator: Arc<dyn GenerationBackend>) -> Self {
        Self { generator }
    }

    /// Extract memories from the last turns of a conversation. A model
    /// response that isn't valid JSON yields zero memories, not an error.
    pub async fn extract(&self, conversation: &[ChatMessage]) -> Result<Vec<NewMemory>> {
        if conversation.is_empty() {
            return Ok(vec![]);
        }

        let tail_start = conversation
            .len()
            .saturating_sub(defaults::MEMORY_EXTRACT_TURNS);
        let transcript: String = conversation[tail_start..]
            .iter()
            .map(|m| format!("{}: {}\n", m.role.as_str(), m.content))
            .collect();

        let prompt = format!("{}{}", MEMORY_EXTRACT_PROMPT, transcript);
        let completion = self
            .generator
            .generate(&[PromptMessage::user(prompt)])
            .await?;

        Ok(parse_memories(&completion.content))
    }

    /// Extract and persist in one step; the returned count is logged by
    /// the caller.
    pub async fn extract_and_store(
        &self,
        memories_repo: &dyn MemoryRepository,
        session_id: Uuid,
        conversation: &[ChatMessage],
    ) -> Result<usize> {
        let memories = self.extract(conversation).await?;
        if memories.is_empty() {
            return Ok(0);
        }
        let created = memories_repo.insert_many(session_id, &memories).await?;
        debug!(
            subsystem = "chat",
            component = "memory",
            session_id = %session_id,
            result_count = created.len(),
            "Memories extracted"
        );
        Ok(created.len())
    }
}

/// Parse the model's JSON answer, tolerating markdown code fences.
fn parse_memories(raw: &str) -> Vec<NewMemory> {
    let json = strip_code_fence(raw);
    let parsed: ExtractedMemories = match serde_json::from_str(json) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(
                subsystem = "chat",
                component = "memory",
                error = %e,
                "Unparseable memory extraction response"
            );
            return vec![];
        }
    };

    parsed
        .memories
        .into_iter()
        .filter_map(|m| {
            let memory_type = match m.memory_type.as_str() {
                "user_preference" => MemoryType::UserPreference,
                "fact" => MemoryType::Fact,
                "context" => MemoryType::Context,
                "insight" => MemoryType::Insight,
                other => {
                    warn!(
                        subsystem = "chat",
                        component = "memory",
                        memory_type = other,
                        "Dropping memory with unknown type"
                    );
                    return None;
                }
            };
            if m.content.trim().is_empty() {
                return None;
            }
            Some(
                NewMemory {
                    memory_type,
                    content: m.content.trim().to_string(),
                    importance_score: m.importance,
                }
                .clamped(),
            )
        })
        .collect()
}

/// Strip a surrounding ```json fence if the model added one.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mnema_core::MessageRole;
    use mnema_inference::MockBackend;

    fn message(role: MessageRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            metadata: serde_json::json!({}),
            parent_message_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_memories_valid_json() {
        let raw = r#"{"memories": [{"type": "fact", "content": "User works in Tokyo", "importance": 0.7}]}"#;
        let memories = parse_memories(raw);
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].memory_type, MemoryType::Fact);
        assert_eq!(memories[0].content, "User works in Tokyo");
    }

    #[test]
    fn test_parse_memories_code_fenced() {
        let raw = "```json\n{\"memories\": [{\"type\": \"context\", \"content\": \"Building a Rust service\", \"importance\": 0.5}]}\n```";
        let memories = parse_memories(raw);
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].memory_type, MemoryType::Context);
    }

    #[test]
    fn test_parse_memories_clamps_importance() {
        let raw = r#"{"memories": [{"type": "fact", "content": "x", "importance": 2.5}]}"#;
        let memories = parse_memories(raw);
        assert_eq!(memories[0].importance_score, 1.0);
    }

    #[test]
    fn test_parse_memories_drops_unknown_type() {
        let raw = r#"{"memories": [{"type": "opinion", "content": "x", "importance": 0.5}]}"#;
        assert!(parse_memories(raw).is_empty());
    }

    #[test]
    fn test_parse_memories_drops_empty_content() {
        let raw = r#"{"memories": [{"type": "fact", "content": "  ", "importance": 0.5}]}"#;
        assert!(parse_memories(raw).is_empty());
    }

    #[test]
    fn test_parse_memories_garbage_returns_empty() {
        assert!(parse_memories("the model rambled instead").is_empty());
    }

    #[tokio::test]
    async fn test_extract_empty_conversation() {
        let extractor = MemoryExtractor::new(Arc::new(MockBackend::new("{}")));
        let memories = extractor.extract(&[]).await.unwrap();
        assert!(memories.is_empty());
    }

    #[tokio::test]
    async fn test_extract_includes_conversation_tail() {
        let backend = Arc::new(MockBackend::new(r#"{"memories": []}"#));
        let extractor = MemoryExtractor::new(backend.clone());
        let conversation = vec![
            message(MessageRole::User, "I prefer short answers"),
            message(MessageRole::Assistant, "Noted."),
        ];
        extractor.extract(&conversation).await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let prompt = &prompts[0][0].content;
        assert!(prompt.contains("user: I prefer short answers"));
        assert!(prompt.contains("assistant: Noted."));
    }

    #[tokio::test]
    async fn test_extract_limits_to_recent_turns() {
        let backend = Arc::new(MockBackend::new(r#"{"memories": []}"#));
        let extractor = MemoryExtractor::new(backend.clone());
        let conversation: Vec<ChatMessage> = (0..30)
            .map(|i| message(MessageRole::User, &format!("turn-{i}")))
            .collect();
        extractor.extract(&conversation).await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let prompt = &prompts[0][0].content;
        assert!(!prompt.contains("turn-19"));
        assert!(prompt.contains("turn-20"));
        assert!(prompt.contains("turn-29"));
    }
}
