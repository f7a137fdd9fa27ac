//! Centralized default constants for the mnema system.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// CHUNKING
// =============================================================================

/// Target characters per chunk (≈ 400 tokens of mixed-script prose).
pub const CHUNK_SIZE: usize = 1200;

/// Overlap characters between adjacent chunks for context preservation.
pub const CHUNK_OVERLAP: usize = 200;

/// A chunk never exceeds this multiple of `CHUNK_SIZE`; a boundary that
/// would violate it forces a mid-token split.
pub const CHUNK_HARD_CAP_FACTOR: f64 = 1.25;

/// Chunk size as i32 (for serde default functions on DB-facing types).
pub const CHUNK_SIZE_I32: i32 = CHUNK_SIZE as i32;

/// Chunk overlap as i32 (for serde default functions on DB-facing types).
pub const CHUNK_OVERLAP_I32: i32 = CHUNK_OVERLAP as i32;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Embedding vector dimension for text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Maximum inputs per embedding API call.
pub const EMBED_BATCH_SIZE: usize = 96;

/// Timeout for one embedding batch in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// GENERATION
// =============================================================================

/// Default chat/completion model name.
pub const CHAT_MODEL: &str = "gpt-4o-mini";

/// Timeout for completion requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 60;

/// Default sampling temperature for chat turns.
pub const CHAT_TEMPERATURE: f32 = 0.3;

/// Default completion token cap for chat turns.
pub const CHAT_MAX_TOKENS: u32 = 2000;

/// Retry attempts for retryable upstream failures (429/5xx/timeout).
pub const LLM_MAX_RETRIES: u32 = 3;

// =============================================================================
// SUMMARY
// =============================================================================

/// Output token cap for article summaries.
pub const SUMMARY_MAX_TOKENS: u32 = 300;

/// Input truncation before the summary call, in characters.
pub const SUMMARY_INPUT_CHAR_LIMIT: usize = 12_000;

/// Maximum persisted summary length in characters.
pub const SUMMARY_MAX_CHARS: usize = 1500;

/// Summary cache entry time-to-live in seconds.
pub const SUMMARY_CACHE_TTL_SECS: u64 = 3600;

// =============================================================================
// FETCH
// =============================================================================

/// Connect timeout for page fetches in seconds.
pub const FETCH_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Total timeout for page fetches in seconds.
pub const FETCH_TOTAL_TIMEOUT_SECS: u64 = 15;

/// Maximum redirects followed by the fetcher.
pub const FETCH_MAX_REDIRECTS: usize = 5;

/// Response body ceiling in bytes.
pub const FETCH_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Desktop user-agent sent with page fetches.
pub const FETCH_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

// =============================================================================
// PREPROCESSING
// =============================================================================

/// Key sentences extracted by the graph ranker.
pub const PREPROCESS_KEY_SENTENCES: usize = 8;

/// Top paragraphs selected after sentence mapping.
pub const PREPROCESS_TOP_K_PARAGRAPHS: usize = 4;

/// Context window (paragraphs either side) in balanced mode.
pub const PREPROCESS_CONTEXT_WINDOW: usize = 1;

/// Paragraph retention ratio in preserve mode.
pub const PREPROCESS_PRESERVE_RATIO: f64 = 0.8;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Default top-k for chunk retrieval.
pub const RAG_DEFAULT_K: usize = 6;

/// Minimum cosine similarity for a chunk to qualify.
pub const RAG_DEFAULT_MIN_SCORE: f32 = 0.2;

/// Token budget for the assembled context block.
pub const RAG_MAX_CONTEXT_TOKENS: usize = 2000;

// =============================================================================
// CHAT
// =============================================================================

/// Recent turns included in the prompt.
pub const CHAT_HISTORY_TURNS: usize = 20;

/// Memories included in the prompt, by importance.
pub const CHAT_PROMPT_MEMORIES: usize = 5;

/// Session title length derived from the first user message.
pub const SESSION_TITLE_CHARS: usize = 40;

/// Conversation tail handed to the memory extractor.
pub const MEMORY_EXTRACT_TURNS: usize = 10;

// =============================================================================
// MEMORY CONSOLIDATION
// =============================================================================

/// Textual similarity above which two memories merge.
pub const CONSOLIDATION_THRESHOLD: f64 = 0.8;

/// Retained memories per type bucket.
pub const MAX_MEMORIES_PER_TYPE: usize = 50;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;

/// Chat rate limit: requests per minute per user or client IP.
pub const RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 30;

/// Default page size for list endpoints.
pub const PAGE_LIMIT: i64 = 20;

/// Maximum request body size in bytes (2 MB).
pub const MAX_BODY_SIZE_BYTES: usize = 2 * 1024 * 1024;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

// =============================================================================
// VALIDATION
// =============================================================================

/// Maximum URL length accepted on insight creation.
pub const URL_MAX_CHARS: usize = 500;

/// Maximum user-note ("thought") length.
pub const THOUGHT_MAX_CHARS: usize = 2000;

// =============================================================================
// INGESTION
// =============================================================================

/// Top-level deadline for one ingestion pipeline run in seconds.
pub const INGEST_DEADLINE_SECS: u64 = 300;

/// Concurrent ingestion pipelines per process.
pub const INGEST_MAX_CONCURRENT: usize = 4;

// =============================================================================
// DATABASE
// =============================================================================

/// Timeout for individual DB calls in seconds.
pub const DB_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// DIGEST
// =============================================================================

/// Retry ceiling for failed digest sends.
pub const DIGEST_MAX_RETRIES: i32 = 3;

/// Highlighted items in the digest payload.
pub const DIGEST_HIGHLIGHTS: usize = 5;

/// Remainder items cap in the digest payload.
pub const DIGEST_MORE_CONTENT_CAP: usize = 10;

/// Timeout for email provider calls in seconds.
pub const EMAIL_TIMEOUT_SECS: u64 = 30;
