//! Chat endpoint: SSE streaming and the non-streaming JSON variant.
//!
//! Stream framing is `data: {json}\n\n` with event kinds `session_info`,
//! `content`, terminal `done`, and `error`. The driver task aborts as
//! soon as the client disconnects (send fails), which drops the prepared
//! turn and discards the partial answer without persistence.

use std::convert::Infallible;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use mnema_core::{ChatRequest, StreamDelta};

use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// Either an SSE stream or a single JSON body, depending on `stream`.
pub enum ChatResponse {
    Stream(
        HeaderMap,
        Sse<ReceiverStream<Result<Event, Infallible>>>,
    ),
    Json(HeaderMap, Json<JsonValue>),
}

impl axum::response::IntoResponse for ChatResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            ChatResponse::Stream(headers, sse) => (headers, sse).into_response(),
            ChatResponse::Json(headers, json) => (headers, json).into_response(),
        }
    }
}

/// `POST /api/v1/chat?session_id=` — one conversational turn.
pub async fn chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    auth: Auth,
    Json(body): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    // Rate limit before any retrieval work happens. Auth is mandatory on
    // this route, so the bucket keys on the user id.
    state.rate_limiter.check(&auth.user_id.to_string())?;

    let start = Instant::now();
    let prepared = state
        .engine
        .prepare_turn(auth.user_id, query.session_id, &body.message)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Session-ID",
        prepared
            .session
            .id
            .to_string()
            .parse()
            .expect("uuid is a valid header value"),
    );

    if !body.stream {
        let session_id = prepared.session.id;
        let request_id = prepared.request_id;
        let (answer, outcome) = state.engine.complete_turn(prepared, start).await?;
        let latency_ms = start.elapsed().as_millis() as u64;
        return Ok(ChatResponse::Json(
            headers,
            Json(json!({
                "success": true,
                "data": {
                    "response": answer,
                    "sources": outcome.sources,
                    "request_id": request_id,
                    "latency_ms": latency_ms,
                    "session_id": session_id,
                }
            })),
        ));
    }

    let engine = state.engine.clone();
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);

    tokio::spawn(async move {
        let request_id = prepared.request_id;
        let session_id = prepared.session.id;

        let session_info = sse_json(&json!({
            "type": "session_info",
            "session_id": session_id,
            "request_id": request_id,
        }));
        if tx.send(Ok(session_info)).await.is_err() {
            return;
        }

        let mut stream = match engine.start_stream(&prepared).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.send(Ok(error_event(&e, request_id))).await;
                return;
            }
        };

        let mut answer = String::new();
        let mut usage = None;

        while let Some(delta) = stream.next().await {
            match delta {
                Ok(StreamDelta::Content(content)) => {
                    answer.push_str(&content);
                    let event = sse_json(&json!({ "type": "content", "content": content }));
                    if tx.send(Ok(event)).await.is_err() {
                        // Client gone: abort generation, discard the turn.
                        return;
                    }
                }
                Ok(StreamDelta::Done(u)) => usage = Some(u),
                Err(e) => {
                    warn!(
                        subsystem = "api",
                        component = "chat",
                        request_id = %request_id,
                        error = %e,
                        "Stream failed mid-way, discarding partial answer"
                    );
                    let _ = tx.send(Ok(error_event(&e, request_id))).await;
                    return;
                }
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        match engine
            .finalize_turn(prepared, &answer, usage.unwrap_or_default(), latency_ms)
            .await
        {
            Ok(outcome) => {
                let done = sse_json(&json!({
                    "type": "done",
                    "request_id": request_id,
                    "session_id": session_id,
                    "latency_ms": latency_ms,
                    "sources": outcome.sources,
                }));
                let _ = tx.send(Ok(done)).await;
            }
            Err(e) => {
                let _ = tx.send(Ok(error_event(&e, request_id))).await;
            }
        }
    });

    Ok(ChatResponse::Stream(
        headers,
        Sse::new(ReceiverStream::new(rx)),
    ))
}

/// `GET /api/v1/chat/health` — liveness probe.
pub async fn chat_health(State(state): State<AppState>) -> Json<JsonValue> {
    let db_ok = state.db.health_check().await.is_ok();
    let status = if db_ok { "healthy" } else { "unhealthy" };
    Json(json!({
        "status": status,
        "timestamp": Utc::now(),
        "features": {
            "rag_enabled": true,
            "streaming_enabled": true,
            "rate_limiting_enabled": true,
        }
    }))
}

fn sse_json(value: &JsonValue) -> Event {
    Event::default().data(value.to_string())
}

fn error_event(e: &mnema_core::Error, request_id: Uuid) -> Event {
    let code = match e {
        mnema_core::Error::RateLimited { .. } => "rate_limited",
        mnema_core::Error::Upstream { .. } => "upstream_error",
        mnema_core::Error::Inference(_) => "inference_error",
        _ => "chat_error",
    };
    sse_json(&json!({
        "type": "error",
        "code": code,
        "message": e.to_string(),
        "request_id": request_id,
    }))
}
