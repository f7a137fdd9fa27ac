//! Chat session CRUD handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use mnema_core::{ChatSession, ChatStore, Error, MemoryRepository};

use crate::auth::Auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Load a session and verify ownership.
async fn owned_session(state: &AppState, user_id: Uuid, id: Uuid) -> Result<ChatSession, ApiError> {
    let session = state
        .db
        .chat
        .get_session(id)
        .await?
        .ok_or(Error::SessionNotFound(id))?;
    if session.user_id != user_id {
        return Err(ApiError(Error::Forbidden(format!(
            "session {} does not belong to the caller",
            id
        ))));
    }
    Ok(session)
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// `POST /api/v1/chat/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    auth: Auth,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<ChatSession>> {
    let session = state
        .db
        .chat
        .create_session(auth.user_id, req.title.as_deref())
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    20
}

/// `GET /api/v1/chat/sessions?page=&size=`
pub async fn list_sessions(
    State(state): State<AppState>,
    auth: Auth,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<JsonValue>> {
    let (sessions, total) = state
        .db
        .chat
        .list_sessions(auth.user_id, query.page, query.size)
        .await?;
    Ok(Json(json!({
        "sessions": sessions,
        "total": total,
        "page": query.page,
        "size": query.size,
    })))
}

/// `GET /api/v1/chat/sessions/:id`
pub async fn get_session(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(owned_session(&state, auth.user_id, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

/// `PUT /api/v1/chat/sessions/:id`
pub async fn update_session(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSessionRequest>,
) -> ApiResult<Json<ChatSession>> {
    owned_session(&state, auth.user_id, id).await?;
    state.db.chat.update_session_title(id, &req.title).await?;
    Ok(Json(owned_session(&state, auth.user_id, id).await?))
}

/// `DELETE /api/v1/chat/sessions/:id` — soft deactivation.
pub async fn delete_session(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    owned_session(&state, auth.user_id, id).await?;
    state.db.chat.deactivate_session(id, auth.user_id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_message_limit")]
    pub limit: i64,
}

fn default_message_limit() -> i64 {
    100
}

/// `GET /api/v1/chat/sessions/:id/messages?limit=`
pub async fn list_messages(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<JsonValue>> {
    owned_session(&state, auth.user_id, id).await?;
    let messages = state.db.chat.list_messages(id, query.limit).await?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    #[serde(default = "default_context_limit")]
    pub limit_messages: i64,
}

fn default_context_limit() -> i64 {
    20
}

/// `GET /api/v1/chat/sessions/:id/context?limit_messages=` — the recent
/// turns plus active memories, as the next prompt would see them.
pub async fn session_context(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
    Query(query): Query<ContextQuery>,
) -> ApiResult<Json<JsonValue>> {
    let session = owned_session(&state, auth.user_id, id).await?;
    let messages = state
        .db
        .chat
        .recent_messages(id, query.limit_messages)
        .await?;
    let memories = state
        .db
        .memories
        .active_for_session(id, mnema_core::defaults::CHAT_PROMPT_MEMORIES as i64)
        .await?;

    Ok(Json(json!({
        "session": session,
        "messages": messages,
        "memories": memories,
    })))
}
