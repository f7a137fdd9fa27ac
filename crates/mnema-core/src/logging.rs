//! Structured logging schema and field name constants for mnema.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (chunks, stream deltas) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → background task → sub-calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "ingest", "rag", "chat", "digest", "db", "inference"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "fetcher", "pipeline", "retriever", "summary_cache", "brevo"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "ingest", "retrieve", "chat_turn", "dispatch", "embed_texts"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Insight UUID being operated on.
pub const INSIGHT_ID: &str = "insight_id";

/// Chat session UUID.
pub const SESSION_ID: &str = "session_id";

/// User UUID (auth identity).
pub const USER_ID: &str = "user_id";

/// Digest UUID.
pub const DIGEST_ID: &str = "digest_id";

/// URL being fetched or summarized.
pub const URL: &str = "url";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a retrieval or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks processed (chunking, embedding, retrieval).
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Prompt tokens consumed by an LLM call.
pub const PROMPT_TOKENS: &str = "prompt_tokens";

/// Completion tokens produced by an LLM call.
pub const COMPLETION_TOKENS: &str = "completion_tokens";

// ─── Retrieval fields ──────────────────────────────────────────────────────

/// Top-k requested from the retriever.
pub const RAG_K: &str = "rag_k";

/// Minimum similarity threshold applied.
pub const RAG_MIN_SCORE: &str = "rag_min_score";

/// Tokens in the assembled context block.
pub const CONTEXT_TOKENS: &str = "context_tokens";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Digest fields ─────────────────────────────────────────────────────────

/// ISO week-start date keying a digest send.
pub const WEEK_START: &str = "week_start";

/// Digest decision outcome ("sent", "skipped", "failed").
pub const DECISION: &str = "decision";

/// Reason a digest was skipped.
pub const SKIPPED_REASON: &str = "skipped_reason";
