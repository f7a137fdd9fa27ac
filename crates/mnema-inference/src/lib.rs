//! # mnema-inference
//!
//! OpenAI-compatible inference layer for mnema: chat completions (blocking
//! and streaming), batched embeddings, retry/backoff policy, and a mock
//! backend for tests.

pub mod client;
pub mod mock;
pub mod streaming;
pub mod types;

pub use client::{OpenAiClient, OpenAiConfig, DEFAULT_OPENAI_URL};
pub use mock::MockBackend;
pub use streaming::parse_sse_stream;
