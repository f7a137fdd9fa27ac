//! Error types for mnema.

use thiserror::Error;

/// Result type alias using mnema's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for mnema operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insight not found
    #[error("Insight not found: {0}")]
    InsightNotFound(uuid::Uuid),

    /// Chat session not found
    #[error("Session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    /// Request validation failed (bad shape, oversize fields)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication missing or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not the owner of the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Local or upstream rate limit exceeded; retry after the given seconds
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Completion/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Upstream provider failure (LLM 5xx, email provider, timeouts)
    #[error("Upstream error: {message}")]
    Upstream {
        message: String,
        /// Whether the caller may retry (429/5xx/timeout vs. 400/401).
        retryable: bool,
    },

    /// Page fetch failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Retrieval/search operation failed
    #[error("Search error: {0}")]
    Search(String),

    /// Email delivery failed
    #[error("Email error: {0}")]
    Email(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::Upstream { retryable: true, .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Upstream {
                message: e.to_string(),
                retryable: true,
            }
        } else {
            Error::Request(e.to_string())
        }
    }
}
