//! mnema-api - HTTP API server for the mnema knowledge service.

mod auth;
mod error;
mod handlers;
mod rate_limit;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use mnema_chat::{ChatEngine, Consolidator, MemoryExtractor};
use mnema_core::defaults;
use mnema_db::Database;
use mnema_digest::{
    BrevoClient, BrevoConfig, DigestBuilder, DigestDispatcher, DispatcherConfig, WebhookHandler,
};
use mnema_inference::OpenAiClient;
use mnema_ingest::{IngestConfig, IngestionPipeline, SummaryCache};
use mnema_rag::{ContextConfig, RetrievalParams, Retriever};

use auth::{AuthBackendVerifier, DevTokenVerifier, TokenResolver, TokenVerifier};
use rate_limit::ChatRateLimiter;
use state::AppState;

/// Generates time-ordered UUIDv7 request correlation ids.
///
/// UUIDv7 embeds a Unix timestamp, so ids sort chronologically — useful
/// for log correlation across request → background task boundaries.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mnema=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/mnema".to_string());
    let db = Database::connect(&database_url).await?;

    let inference = Arc::new(OpenAiClient::from_env()?);

    let summary_cache = Arc::new(SummaryCache::with_default_ttl());
    let pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        inference.clone(),
        inference.clone(),
        summary_cache,
        IngestConfig::from_env(),
    ));

    let retriever = Retriever::new(Arc::new(db.chunks.clone()), inference.clone());
    let extractor = MemoryExtractor::new(inference.clone());
    let consolidator = Consolidator::new(
        Arc::new(db.memories.clone()),
        Arc::new(db.profiles.clone()),
    );
    let engine = Arc::new(ChatEngine::new(
        db.clone(),
        inference.clone(),
        retriever,
        extractor,
        consolidator,
        RetrievalParams::from_env(),
        ContextConfig::from_env(),
    ));

    // The digest path only exists when the provider is configured;
    // everything else runs fine without it.
    let dispatcher = match BrevoConfig::from_env() {
        Ok(config) => {
            let brevo = Arc::new(BrevoClient::new(config)?);
            let builder = DigestBuilder::new(db.clone(), inference.clone());
            Some(Arc::new(DigestDispatcher::new(
                db.clone(),
                builder,
                brevo,
                DispatcherConfig::from_env(),
            )))
        }
        Err(e) => {
            warn!(
                subsystem = "api",
                error = %e,
                "Email provider unconfigured, digest endpoints disabled"
            );
            None
        }
    };

    let webhooks = Arc::new(WebhookHandler::new(db.clone()));

    let mut verifiers: Vec<Arc<dyn TokenVerifier>> = Vec::new();
    if let Ok(auth_url) = std::env::var("AUTH_BACKEND_URL") {
        verifiers.push(Arc::new(AuthBackendVerifier::new(auth_url)));
    }
    let dev_tokens = std::env::var("DEV_TOKEN_AUTH")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if dev_tokens || verifiers.is_empty() {
        if verifiers.is_empty() {
            warn!(
                subsystem = "api",
                "AUTH_BACKEND_URL unset, falling back to dev token auth"
            );
        }
        verifiers.push(Arc::new(DevTokenVerifier));
    }
    let token_resolver = Arc::new(TokenResolver::new(verifiers));

    let state = AppState {
        db,
        pipeline,
        engine,
        dispatcher,
        webhooks,
        token_resolver,
        rate_limiter: Arc::new(ChatRateLimiter::from_env()),
        cron_secret: std::env::var("CRON_SECRET").ok(),
    };

    let cors = CorsLayer::new()
        .allow_origin(cors_origin())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-cron-secret"),
        ])
        .max_age(Duration::from_secs(defaults::CORS_MAX_AGE_SECS));

    let app = Router::new()
        .route("/health", get(health))
        // Insights
        .route(
            "/api/v1/insights",
            get(handlers::insights::list_insights).post(handlers::insights::create_insight),
        )
        .route("/api/v1/insights/all", get(handlers::insights::list_all_insights))
        .route(
            "/api/v1/insights/sync/incremental",
            get(handlers::insights::incremental_sync),
        )
        .route(
            "/api/v1/insights/:id",
            get(handlers::insights::get_insight)
                .put(handlers::insights::update_insight)
                .delete(handlers::insights::delete_insight),
        )
        .route(
            "/api/v1/insight-chunks/:id/summary",
            get(handlers::insights::chunk_summary),
        )
        // Metadata
        .route("/api/v1/metadata/extract", post(handlers::metadata::extract_metadata))
        .route(
            "/api/v1/metadata/summary/:url",
            get(handlers::metadata::summary_status),
        )
        // Chat
        .route("/api/v1/chat", post(handlers::chat::chat))
        .route("/api/v1/chat/health", get(handlers::chat::chat_health))
        .route(
            "/api/v1/chat/sessions",
            get(handlers::sessions::list_sessions).post(handlers::sessions::create_session),
        )
        .route(
            "/api/v1/chat/sessions/:id",
            get(handlers::sessions::get_session)
                .put(handlers::sessions::update_session)
                .delete(handlers::sessions::delete_session),
        )
        .route(
            "/api/v1/chat/sessions/:id/messages",
            get(handlers::sessions::list_messages),
        )
        .route(
            "/api/v1/chat/sessions/:id/context",
            get(handlers::sessions::session_context),
        )
        // Memory
        .route(
            "/api/v1/user/memory/consolidate",
            post(handlers::memory::consolidate),
        )
        .route(
            "/api/v1/user/memory/auto-consolidate",
            post(handlers::memory::auto_consolidate),
        )
        .route("/api/v1/user/memory/profile", get(handlers::memory::memory_profile))
        .route("/api/v1/user/memory/summary", get(handlers::memory::memory_summary))
        .route("/api/v1/user/memory/settings", put(handlers::memory::update_settings))
        // Email
        .route("/api/v1/email/cron/digest", post(handlers::email::cron_digest))
        .route("/api/v1/email/digest/test-send", post(handlers::email::test_send))
        .route(
            "/api/v1/email/preferences",
            get(handlers::email::get_preferences).put(handlers::email::update_preferences),
        )
        .route("/api/v1/email/webhooks/brevo", post(handlers::email::brevo_webhook))
        .route(
            "/api/v1/email/unsubscribe/:token",
            get(handlers::email::unsubscribe),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(RequestBodyLimitLayer::new(defaults::MAX_BODY_SIZE_BYTES))
        .layer(cors)
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(
        subsystem = "api",
        op = "startup",
        %addr,
        "mnema-api listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(subsystem = "api", op = "shutdown", "mnema-api stopped");
    Ok(())
}

/// `GET /health` — process liveness.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn cors_origin() -> AllowOrigin {
    match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            AllowOrigin::list(parsed)
        }
        Err(_) => AllowOrigin::any(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl_c handler installs on every supported platform");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installs on unix")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(subsystem = "api", "Shutdown signal received");
}
