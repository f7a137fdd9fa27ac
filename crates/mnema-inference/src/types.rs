//! Wire types for the OpenAI-compatible HTTP API.
//!
//! Only the fields this service actually reads are modeled; everything
//! else in the provider's responses is ignored at deserialization.
//! Response-side helpers (`into_ordered_vectors`, `into_content`,
//! `joined_content`) keep the JSON shape quirks out of the client.

use serde::{Deserialize, Serialize};

use mnema_core::{PromptMessage, TokenUsage};

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// `POST /embeddings` body.
#[derive(Debug, Serialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: Vec<String>,
    pub encoding_format: &'static str,
}

impl EmbedRequest {
    /// Request raw float vectors for a batch of inputs.
    pub fn float(model: &str, input: Vec<String>) -> Self {
        Self {
            model: model.to_string(),
            input,
            encoding_format: "float",
        }
    }
}

/// `POST /embeddings` reply. The provider may return items out of input
/// order; each carries its input index.
#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    #[serde(rename = "data")]
    pub items: Vec<EmbedItem>,
    pub usage: EmbedUsage,
}

/// One embedded input.
#[derive(Debug, Deserialize)]
pub struct EmbedItem {
    #[serde(rename = "embedding")]
    pub vector: Vec<f32>,
    pub index: usize,
}

/// Billing counters on an embedding reply.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EmbedUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

impl EmbedResponse {
    /// Vectors restored to input order.
    pub fn into_ordered_vectors(self) -> Vec<Vec<f32>> {
        let mut items = self.items;
        items.sort_by_key(|item| item.index);
        items.into_iter().map(|item| item.vector).collect()
    }
}

// =============================================================================
// COMPLETIONS
// =============================================================================

/// `POST /chat/completions` body. Sampling knobs are always sent — the
/// service has no "provider default" mode.
#[derive(Debug, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

impl CompletionRequest {
    /// One-shot request.
    pub fn blocking(
        model: &str,
        messages: Vec<WireMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
            stream: false,
            stream_options: None,
        }
    }

    /// Streaming request; asks the provider to close with a usage chunk.
    pub fn streaming(
        model: &str,
        messages: Vec<WireMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            ..Self::blocking(model, messages, temperature, max_tokens)
        }
    }
}

/// Streaming request options.
#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// One prompt message as the provider sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl WireMessage {
    /// Map the domain prompt onto wire messages, preserving order.
    pub fn from_prompt(messages: &[PromptMessage]) -> Vec<Self> {
        messages
            .iter()
            .map(|m| Self {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

/// `POST /chat/completions` reply (non-streaming).
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<UsageCounts>,
}

impl CompletionResponse {
    /// Content of the first choice; empty when the provider returned none.
    pub fn into_content(self) -> String {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default()
    }
}

/// One completion choice.
#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token counters, shared by blocking replies and terminal stream chunks.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UsageCounts {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<UsageCounts> for TokenUsage {
    fn from(counts: UsageCounts) -> Self {
        TokenUsage {
            prompt_tokens: counts.prompt_tokens,
            completion_tokens: counts.completion_tokens,
        }
    }
}

// =============================================================================
// STREAMING
// =============================================================================

/// One SSE frame of a streaming completion. A frame carries content
/// deltas, a terminal usage report, or neither (role-only preamble).
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<UsageCounts>,
}

impl StreamChunk {
    /// Concatenated content of every choice delta in this frame.
    pub fn joined_content(&self) -> String {
        self.choices
            .iter()
            .filter_map(|choice| choice.delta.content.as_deref())
            .collect()
    }
}

/// One choice inside a stream frame.
#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental payload of a stream choice.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error envelope the provider wraps failures in.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Failure details. `kind` and `code` are advisory; `message` is what
/// surfaces into the error taxonomy.
#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    /// Stand-in for responses whose error body doesn't parse.
    pub fn fallback() -> Self {
        Self {
            error: ErrorDetail {
                message: "unreadable upstream error".to_string(),
                kind: String::new(),
                code: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::MessageRole;

    #[test]
    fn test_embed_request_float_serializes_every_field() {
        let request = EmbedRequest::float(
            "mnema-embed-test",
            vec!["saved article body".to_string(), "用户的笔记".to_string()],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "mnema-embed-test");
        assert_eq!(json["encoding_format"], "float");
        assert_eq!(json["input"][1], "用户的笔记");
    }

    #[test]
    fn test_embed_response_restores_input_order() {
        let json = r#"{
            "data": [
                {"embedding": [0.5, 0.5], "index": 1},
                {"embedding": [1.0, 0.0], "index": 0}
            ],
            "usage": {"prompt_tokens": 9, "total_tokens": 9}
        }"#;
        let reply: EmbedResponse = serde_json::from_str(json).unwrap();
        let vectors = reply.into_ordered_vectors();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.5, 0.5]);
    }

    #[test]
    fn test_embed_response_ignores_unmodeled_fields() {
        let json = r#"{
            "object": "list",
            "model": "whatever-the-provider-says",
            "data": [{"embedding": [0.25], "index": 0, "object": "embedding"}],
            "usage": {"prompt_tokens": 1, "total_tokens": 1}
        }"#;
        let reply: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(reply.items.len(), 1);
        assert_eq!(reply.usage.total_tokens, 1);
    }

    #[test]
    fn test_blocking_request_has_no_stream_options() {
        let request = CompletionRequest::blocking("answer-model", vec![], 0.3, 1500);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["temperature"], 0.3);
        assert_eq!(json["max_tokens"], 1500);
        assert!(json.get("stream_options").is_none());
    }

    #[test]
    fn test_streaming_request_asks_for_usage() {
        let request = CompletionRequest::streaming("answer-model", vec![], 0.3, 1500);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_wire_messages_from_prompt_keep_roles_and_order() {
        let prompt = vec![
            PromptMessage::system("ground answers in the saved notes"),
            PromptMessage::user("what did I read about attention?"),
            PromptMessage::assistant("your note on transformers covers it"),
        ];
        let wire = WireMessage::from_prompt(&prompt);
        let roles: Vec<&str> = wire.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(wire[1].content, "what did I read about attention?");
        assert_eq!(prompt[0].role, MessageRole::System);
    }

    #[test]
    fn test_completion_response_first_choice_content() {
        let json = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "答案在第三段。"}, "finish_reason": "stop"},
                {"message": {"role": "assistant", "content": "ignored alternate"}}
            ],
            "usage": {"prompt_tokens": 80, "completion_tokens": 12, "total_tokens": 92}
        }"#;
        let reply: CompletionResponse = serde_json::from_str(json).unwrap();
        let usage = reply.usage.unwrap();
        assert_eq!(usage.completion_tokens, 12);
        assert_eq!(reply.into_content(), "答案在第三段。");
    }

    #[test]
    fn test_completion_response_without_choices_is_empty() {
        let reply: CompletionResponse = serde_json::from_str("{}").unwrap();
        assert!(reply.usage.is_none());
        assert_eq!(reply.into_content(), "");
    }

    #[test]
    fn test_usage_counts_into_token_usage() {
        let counts: UsageCounts =
            serde_json::from_str(r#"{"prompt_tokens": 31, "completion_tokens": 4}"#).unwrap();
        let usage = TokenUsage::from(counts);
        assert_eq!(usage.prompt_tokens, 31);
        assert_eq!(usage.completion_tokens, 4);
        // total_tokens is optional on stream chunks
        assert_eq!(counts.total_tokens, 0);
    }

    #[test]
    fn test_stream_chunk_joins_choice_deltas() {
        let json = r#"{
            "choices": [
                {"delta": {"content": "grounded "}},
                {"delta": {"content": "answer"}},
                {"delta": {}, "finish_reason": "stop"}
            ]
        }"#;
        let chunk: StreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.joined_content(), "grounded answer");
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_stream_chunk_usage_frame_has_no_content() {
        let json = r#"{
            "choices": [],
            "usage": {"prompt_tokens": 55, "completion_tokens": 21, "total_tokens": 76}
        }"#;
        let chunk: StreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.joined_content(), "");
        assert_eq!(chunk.usage.unwrap().prompt_tokens, 55);
    }

    #[test]
    fn test_error_detail_minimal_body() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"error": {"message": "model overloaded"}}"#).unwrap();
        assert_eq!(body.error.message, "model overloaded");
        assert!(body.error.kind.is_empty());
        assert!(body.error.code.is_none());
    }

    #[test]
    fn test_error_body_fallback() {
        let body = ErrorBody::fallback();
        assert_eq!(body.error.message, "unreadable upstream error");
        assert!(body.error.code.is_none());
    }
}
