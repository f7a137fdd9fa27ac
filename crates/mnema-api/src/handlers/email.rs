//! Email digest endpoints: cron trigger, preferences, webhooks,
//! unsubscribe landing.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};

use mnema_core::{
    EmailRepository, Error, ProfileRepository, TestSendRequest, UpdateEmailPreferences,
};
use mnema_digest::DigestDispatcher;

use crate::auth::Auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn dispatcher(state: &AppState) -> Result<&DigestDispatcher, ApiError> {
    state
        .dispatcher
        .as_deref()
        .ok_or_else(|| ApiError(Error::Config("email provider is not configured".to_string())))
}

/// `POST /api/v1/email/cron/digest` — hourly sweep, authenticated by the
/// shared `X-Cron-Secret` header.
pub async fn cron_digest(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<JsonValue>> {
    let expected = state
        .cron_secret
        .as_deref()
        .ok_or_else(|| ApiError(Error::Config("CRON_SECRET is not configured".to_string())))?;
    let provided = headers
        .get("X-Cron-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return Err(ApiError(Error::Unauthorized("bad cron secret".to_string())));
    }

    let force = headers
        .get("X-Force-Send")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let result = dispatcher(&state)?.run_sweep(Utc::now(), force).await?;
    Ok(Json(serde_json::to_value(result).map_err(Error::from)?))
}

/// `POST /api/v1/email/digest/test-send` — owner-authed test delivery.
pub async fn test_send(
    State(state): State<AppState>,
    auth: Auth,
    Json(req): Json<TestSendRequest>,
) -> ApiResult<Json<JsonValue>> {
    let result = dispatcher(&state)?
        .test_send(
            auth.user_id,
            req.dry_run,
            req.force,
            req.email_override.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

/// `GET /api/v1/email/preferences`
pub async fn get_preferences(
    State(state): State<AppState>,
    auth: Auth,
) -> ApiResult<Json<JsonValue>> {
    // Creating-on-read keeps the client contract simple: a fresh user
    // sees defaults rather than a 404.
    let prefs = state
        .db
        .email
        .upsert_preferences(auth.user_id, &UpdateEmailPreferences::default())
        .await?;
    Ok(Json(serde_json::to_value(prefs).map_err(Error::from)?))
}

/// `PUT /api/v1/email/preferences`
pub async fn update_preferences(
    State(state): State<AppState>,
    auth: Auth,
    Json(req): Json<UpdateEmailPreferences>,
) -> ApiResult<Json<JsonValue>> {
    let prefs = state.db.email.upsert_preferences(auth.user_id, &req).await?;
    Ok(Json(serde_json::to_value(prefs).map_err(Error::from)?))
}

/// `POST /api/v1/email/webhooks/brevo` — provider event ingestion.
pub async fn brevo_webhook(
    State(state): State<AppState>,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Json<JsonValue>> {
    let outcome = state.webhooks.process(&payload).await?;
    Ok(Json(json!({ "success": true, "outcome": format!("{:?}", outcome) })))
}

/// `GET /api/v1/email/unsubscribe/:token` — flips the digest off and
/// records a suppression. Unauthenticated by design: the token is the
/// credential.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let user_id = state
        .db
        .email
        .resolve_unsubscribe_token(&token)
        .await?
        .ok_or_else(|| ApiError(Error::NotFound("unsubscribe token".to_string())))?;

    state.db.email.disable_digest(user_id).await?;

    if let Some(profile) = state.db.profiles.get(user_id).await? {
        if let Some(email) = profile.email {
            state.db.email.add_suppression(&email, "unsubscribe").await?;
        }
    }

    Ok(Json(json!({
        "success": true,
        "detail": "You have been unsubscribed from the weekly digest."
    })))
}
