//! LLM article summarization.

use std::sync::Arc;
use tracing::debug;

use mnema_core::{defaults, GenerationBackend, PromptMessage, Result};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a concise summarization assistant. Provide a 2-4 sentence \
summary capturing the key points only. Exclude navigation, table of contents, and ads. If the text is \
not natural language prose (e.g., code/logs/noise), summarize its topic or purpose. Always write the \
summary in the same language as the input.";

/// Summarizer configuration.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Input truncation before the call, in characters.
    pub input_char_limit: usize,
    /// Persisted summary ceiling, in characters.
    pub max_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            input_char_limit: defaults::SUMMARY_INPUT_CHAR_LIMIT,
            max_chars: defaults::SUMMARY_MAX_CHARS,
        }
    }
}

impl SummarizerConfig {
    /// Read overrides from `SUMMARY_INPUT_CHAR_LIMIT` / `SUMMARY_MAX_CHARS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            input_char_limit: std::env::var("SUMMARY_INPUT_CHAR_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.input_char_limit),
            max_chars: std::env::var("SUMMARY_MAX_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_chars),
        }
    }
}

/// Article summarizer over any generation backend.
#[derive(Clone)]
pub struct Summarizer {
    backend: Arc<dyn GenerationBackend>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: SummarizerConfig) -> Self {
        Self { backend, config }
    }

    /// Summarize `text`. Empty input yields an empty summary without a
    /// backend call.
    pub async fn summarize(&self, text: &str) -> Result<String> {
        let snippet: String = text.trim().chars().take(self.config.input_char_limit).collect();
        if snippet.is_empty() {
            return Ok(String::new());
        }

        let messages = vec![
            PromptMessage::system(SUMMARY_SYSTEM_PROMPT),
            PromptMessage::user(format!(
                "Summarize the following content in the same language as the input.\n\n{}",
                snippet
            )),
        ];

        let completion = self.backend.generate(&messages).await?;
        let summary: String = completion
            .content
            .trim()
            .chars()
            .take(self.config.max_chars)
            .collect();

        debug!(
            subsystem = "ingest",
            component = "summarizer",
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            summary_chars = summary.len(),
            "Summary generated"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_inference::MockBackend;

    #[tokio::test]
    async fn test_summarize_empty_input_skips_backend() {
        let backend = Arc::new(MockBackend::new("should not be used"));
        let summarizer = Summarizer::new(backend.clone(), SummarizerConfig::default());
        let summary = summarizer.summarize("   ").await.unwrap();
        assert!(summary.is_empty());
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summarize_returns_backend_content() {
        let backend = Arc::new(MockBackend::new("A crisp summary."));
        let summarizer = Summarizer::new(backend, SummarizerConfig::default());
        let summary = summarizer.summarize("Long article body.").await.unwrap();
        assert_eq!(summary, "A crisp summary.");
    }

    #[tokio::test]
    async fn test_summarize_truncates_input() {
        let backend = Arc::new(MockBackend::new("ok"));
        let config = SummarizerConfig {
            input_char_limit: 10,
            ..SummarizerConfig::default()
        };
        let summarizer = Summarizer::new(backend.clone(), config);
        summarizer.summarize(&"x".repeat(100)).await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let user_prompt = &prompts[0][1].content;
        assert!(user_prompt.contains(&"x".repeat(10)));
        assert!(!user_prompt.contains(&"x".repeat(11)));
    }

    #[tokio::test]
    async fn test_summarize_caps_output_length() {
        let backend = Arc::new(MockBackend::new("y".repeat(5000)));
        let summarizer = Summarizer::new(backend, SummarizerConfig::default());
        let summary = summarizer.summarize("body").await.unwrap();
        assert_eq!(summary.chars().count(), defaults::SUMMARY_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_summarize_propagates_backend_failure() {
        let backend = Arc::new(MockBackend::failing());
        let summarizer = Summarizer::new(backend, SummarizerConfig::default());
        assert!(summarizer.summarize("body").await.is_err());
    }
}
