//! Shared application state.
//!
//! Every service the handlers touch is an explicit field constructed once
//! at startup — no module-level singletons.

use std::sync::Arc;

use mnema_chat::ChatEngine;
use mnema_db::Database;
use mnema_digest::{DigestDispatcher, WebhookHandler};
use mnema_ingest::IngestionPipeline;

use crate::auth::TokenResolver;
use crate::rate_limit::ChatRateLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Ingestion orchestrator (owns the summary cache).
    pub pipeline: Arc<IngestionPipeline>,
    /// Conversational engine.
    pub engine: Arc<ChatEngine>,
    /// Digest dispatcher; absent when the email provider is unconfigured.
    pub dispatcher: Option<Arc<DigestDispatcher>>,
    /// Brevo webhook ingestion.
    pub webhooks: Arc<WebhookHandler>,
    /// Bearer-token verifier chain.
    pub token_resolver: Arc<TokenResolver>,
    /// Per-user/IP chat rate limiter.
    pub rate_limiter: Arc<ChatRateLimiter>,
    /// Shared secret expected in `X-Cron-Secret`.
    pub cron_secret: Option<String>,
}
