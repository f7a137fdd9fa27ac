//! Mock inference backend for tests.
//!
//! Deterministic: embeddings are derived from a hash of the input text, so
//! identical texts always embed identically and similarity comparisons are
//! stable across runs. Generation replays canned responses in order.

use async_trait::async_trait;
use pgvector::Vector;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use mnema_core::{
    defaults, Completion, EmbeddingBackend, Error, GenerationBackend, PromptMessage, Result,
    StreamDelta, StreamingGeneration, TokenStream, TokenUsage,
};

/// Canned backend implementing all inference traits.
pub struct MockBackend {
    dimension: usize,
    responses: Mutex<Vec<String>>,
    next_response: AtomicUsize,
    /// When true, every call fails with a retryable upstream error.
    pub fail: bool,
    /// Prompts captured from generation calls, newest last.
    pub prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl MockBackend {
    /// Backend that answers every generation with `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_responses(vec![response.into()])
    }

    /// Backend replaying `responses` in order (last one repeats).
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            dimension: defaults::EMBED_DIMENSION,
            responses: Mutex::new(responses),
            next_response: AtomicUsize::new(0),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Backend that fails every call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    /// Deterministic unit-norm vector for a text.
    pub fn vector_for(text: &str, dimension: usize) -> Vector {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut values = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            // xorshift keeps the mock free of rand plumbing
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            values.push(((seed % 2000) as f32 / 1000.0) - 1.0);
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        Vector::from(values)
    }

    fn upstream_error() -> Error {
        Error::Upstream {
            message: "mock failure".to_string(),
            retryable: true,
        }
    }

    fn take_response(&self) -> String {
        let responses = self.responses.lock().unwrap();
        let idx = self.next_response.fetch_add(1, Ordering::SeqCst);
        responses
            .get(idx)
            .or_else(|| responses.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EmbeddingBackend for MockBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if self.fail {
            return Err(Self::upstream_error());
        }
        Ok(texts
            .iter()
            .map(|t| Self::vector_for(t, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<Completion> {
        if self.fail {
            return Err(Self::upstream_error());
        }
        self.prompts.lock().unwrap().push(messages.to_vec());
        let content = self.take_response();
        let usage = TokenUsage {
            prompt_tokens: messages.iter().map(|m| m.content.len() as u32 / 4).sum(),
            completion_tokens: content.len() as u32 / 4,
        };
        Ok(Completion { content, usage })
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

#[async_trait]
impl StreamingGeneration for MockBackend {
    async fn generate_stream(&self, messages: &[PromptMessage]) -> Result<TokenStream> {
        if self.fail {
            return Err(Self::upstream_error());
        }
        self.prompts.lock().unwrap().push(messages.to_vec());
        let content = self.take_response();
        let completion_tokens = content.len() as u32 / 4;

        // Stream word by word to exercise accumulation paths.
        let mut deltas: Vec<Result<StreamDelta>> = content
            .split_inclusive(' ')
            .map(|w| Ok(StreamDelta::Content(w.to_string())))
            .collect();
        deltas.push(Ok(StreamDelta::Done(TokenUsage {
            prompt_tokens: 0,
            completion_tokens,
        })));

        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}
