//! OpenAI-compatible inference client.
//!
//! One client serves both completion and embedding traffic. Retryable
//! upstream failures (429, 5xx, timeouts) are retried with exponential
//! backoff and jitter; everything else surfaces immediately through the
//! error taxonomy.

use async_trait::async_trait;
use pgvector::Vector;
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use mnema_core::{
    defaults, Completion, EmbeddingBackend, Error, GenerationBackend, PromptMessage, Result,
    StreamingGeneration, TokenStream, TokenUsage,
};

use crate::streaming::parse_sse_stream;
use crate::types::*;

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Base delay for retry backoff in milliseconds.
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Configuration for the OpenAI-compatible client.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model used for embeddings.
    pub embed_model: String,
    /// Model used for chat completions.
    pub chat_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    /// Timeout for completion requests.
    pub completion_timeout: Duration,
    /// Timeout for one embedding batch.
    pub embedding_timeout: Duration,
    /// Sampling temperature for completions.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Retry attempts for retryable failures.
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            embed_model: defaults::EMBED_MODEL.to_string(),
            chat_model: defaults::CHAT_MODEL.to_string(),
            embed_dimension: defaults::EMBED_DIMENSION,
            completion_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
            embedding_timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
            temperature: defaults::CHAT_TEMPERATURE,
            max_tokens: defaults::CHAT_MAX_TOKENS,
            max_retries: defaults::LLM_MAX_RETRIES,
        }
    }
}

impl OpenAiConfig {
    /// Create from environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
    /// | `OPENAI_API_KEY` | unset |
    /// | `EMBEDDING_MODEL` | `text-embedding-3-small` |
    /// | `CHAT_MODEL` | `gpt-4o-mini` |
    /// | `CHAT_TEMPERATURE` | `0.3` |
    /// | `CHAT_MAX_TOKENS` | `2000` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            embed_model: std::env::var("EMBEDDING_MODEL").unwrap_or(defaults.embed_model),
            chat_model: std::env::var("CHAT_MODEL").unwrap_or(defaults.chat_model),
            embed_dimension: std::env::var("EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.embed_dimension),
            completion_timeout: defaults.completion_timeout,
            embedding_timeout: defaults.embedding_timeout,
            temperature: std::env::var("CHAT_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
            max_tokens: std::env::var("CHAT_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
            max_retries: defaults.max_retries,
        }
    }

    /// Override the chat model.
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    /// Override the embedding model.
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }
}

/// OpenAI-compatible inference client.
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.completion_timeout)
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            base_url = %config.base_url,
            embed_model = %config.embed_model,
            chat_model = %config.chat_model,
            "Initializing OpenAI client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Build a POST request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    /// Map an HTTP failure status to the error taxonomy.
    async fn status_error(response: reqwest::Response, context: &str) -> Error {
        let status = response.status();
        let body: ErrorBody = response
            .json()
            .await
            .unwrap_or_else(|_| ErrorBody::fallback());
        let message = format!("{}: {} ({})", context, body.error.message, status);

        match status {
            StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                retry_after_secs: 1,
            },
            StatusCode::BAD_REQUEST => Error::Upstream {
                message,
                retryable: false,
            },
            s if s.is_server_error() => Error::Upstream {
                message,
                retryable: true,
            },
            _ => Error::Upstream {
                message,
                retryable: false,
            },
        }
    }

    /// Run `op` with exponential backoff + jitter on retryable failures.
    async fn with_retries<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let base = RETRY_BASE_DELAY_MS * (1 << attempt.min(6));
                    let jitter = rand::thread_rng().gen_range(0..base / 2 + 1);
                    let delay = Duration::from_millis(base + jitter);
                    warn!(
                        subsystem = "inference",
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after upstream failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Embed one batch of at most [`defaults::EMBED_BATCH_SIZE`] inputs.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let request = EmbedRequest::float(&self.config.embed_model, texts.to_vec());

        let response = self
            .build_request("/embeddings")
            .timeout(self.config.embedding_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Upstream {
                        message: format!("Embedding request timed out: {}", e),
                        retryable: true,
                    }
                } else {
                    Error::Embedding(format!("Request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "embeddings").await);
        }

        let reply: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let vectors = reply.into_ordered_vectors();
        for vector in &vectors {
            if vector.len() != self.config.embed_dimension {
                return Err(Error::Embedding(format!(
                    "Expected {}-dim embedding, got {}",
                    self.config.embed_dimension,
                    vector.len()
                )));
            }
        }

        Ok(vectors.into_iter().map(Vector::from).collect())
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiClient {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            subsystem = "inference",
            op = "embed_texts",
            input_count = texts.len(),
            model = %self.config.embed_model,
            "Embedding texts"
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(defaults::EMBED_BATCH_SIZE) {
            let batch_vectors = self
                .with_retries("embed_batch", || self.embed_batch(batch))
                .await?;
            vectors.extend(batch_vectors);
        }

        debug!(
            subsystem = "inference",
            op = "embed_texts",
            result_count = vectors.len(),
            "Generated embeddings"
        );
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OpenAiClient {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<Completion> {
        debug!(
            subsystem = "inference",
            op = "generate",
            model = %self.config.chat_model,
            message_count = messages.len(),
            "Running completion"
        );

        let request = CompletionRequest::blocking(
            &self.config.chat_model,
            WireMessage::from_prompt(messages),
            self.config.temperature,
            self.config.max_tokens,
        );

        let reply: CompletionResponse = self
            .with_retries("generate", || async {
                let response = self
                    .build_request("/chat/completions")
                    .json(&request)
                    .send()
                    .await
                    .map_err(Error::from)?;

                if !response.status().is_success() {
                    return Err(Self::status_error(response, "chat/completions").await);
                }

                response
                    .json()
                    .await
                    .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))
            })
            .await?;

        let usage = reply.usage.map(TokenUsage::from).unwrap_or_default();
        let content = reply.into_content();

        debug!(
            subsystem = "inference",
            op = "generate",
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion finished"
        );

        Ok(Completion { content, usage })
    }

    fn model_name(&self) -> &str {
        &self.config.chat_model
    }
}

#[async_trait]
impl StreamingGeneration for OpenAiClient {
    async fn generate_stream(&self, messages: &[PromptMessage]) -> Result<TokenStream> {
        debug!(
            subsystem = "inference",
            op = "generate_stream",
            model = %self.config.chat_model,
            message_count = messages.len(),
            "Starting streaming completion"
        );

        let request = CompletionRequest::streaming(
            &self.config.chat_model,
            WireMessage::from_prompt(messages),
            self.config.temperature,
            self.config.max_tokens,
        );

        // Only the initial connection is retried; once deltas flow the
        // stream belongs to the caller.
        let response = self
            .with_retries("generate_stream", || async {
                let response = self
                    .build_request("/chat/completions")
                    .json(&request)
                    .send()
                    .await
                    .map_err(Error::from)?;

                if !response.status().is_success() {
                    return Err(Self::status_error(response, "chat/completions").await);
                }
                Ok(response)
            })
            .await?;

        Ok(parse_sse_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenAiConfig::default();
        assert_eq!(config.base_url, DEFAULT_OPENAI_URL);
        assert_eq!(config.embed_model, defaults::EMBED_MODEL);
        assert_eq!(config.chat_model, defaults::CHAT_MODEL);
        assert_eq!(config.embed_dimension, 1536);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = OpenAiConfig::default()
            .with_chat_model("gpt-4o")
            .with_embed_model("text-embedding-3-large");
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.embed_model, "text-embedding-3-large");
    }

    #[test]
    fn test_client_creation() {
        let client = OpenAiClient::new(OpenAiConfig::default()).unwrap();
        assert_eq!(client.config().base_url, DEFAULT_OPENAI_URL);
        assert_eq!(EmbeddingBackend::model_name(&client), defaults::EMBED_MODEL);
        assert_eq!(GenerationBackend::model_name(&client), defaults::CHAT_MODEL);
        assert_eq!(client.dimension(), 1536);
    }

    #[test]
    fn test_retry_base_delay_grows() {
        // 500ms base doubles per attempt, capped at 2^6.
        let delays: Vec<u64> = (1u32..=7)
            .map(|attempt| RETRY_BASE_DELAY_MS * (1 << attempt.min(6)))
            .collect();
        assert_eq!(delays[0], 1000);
        assert_eq!(delays[1], 2000);
        assert_eq!(delays[5], 32_000);
        assert_eq!(delays[6], 32_000);
    }
}
