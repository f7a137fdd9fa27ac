//! User memory profile and consolidation handlers.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use mnema_chat::ConsolidateOptions;
use mnema_core::{
    ConsolidationStrategy, Error, MemoryType, ProfileRepository,
};

use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConsolidateRequest {
    #[serde(default)]
    pub memory_types: Option<Vec<MemoryType>>,
    #[serde(default)]
    pub force_consolidate: bool,
    #[serde(default)]
    pub consolidation_strategy: Option<ConsolidationStrategy>,
}

/// `POST /api/v1/user/memory/consolidate`
pub async fn consolidate(
    State(state): State<AppState>,
    auth: Auth,
    Json(req): Json<ConsolidateRequest>,
) -> ApiResult<Json<JsonValue>> {
    let options = ConsolidateOptions {
        memory_types: req.memory_types,
        strategy: req.consolidation_strategy,
        force: req.force_consolidate,
    };
    let report = state
        .engine
        .consolidator()
        .consolidate(auth.user_id, &options)
        .await?;
    Ok(Json(serde_json::to_value(report).map_err(Error::from)?))
}

#[derive(Debug, Deserialize)]
pub struct AutoConsolidateQuery {
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// `POST /api/v1/user/memory/auto-consolidate?session_id=` — the
/// settings-gated variant the client pings after a conversation.
pub async fn auto_consolidate(
    State(state): State<AppState>,
    auth: Auth,
    Query(query): Query<AutoConsolidateQuery>,
) -> ApiResult<Json<JsonValue>> {
    let _ = query.session_id; // consolidation always spans all sessions
    let report = state
        .engine
        .consolidator()
        .consolidate(auth.user_id, &ConsolidateOptions::default())
        .await?;
    Ok(Json(serde_json::to_value(report).map_err(Error::from)?))
}

/// `GET /api/v1/user/memory/profile`
pub async fn memory_profile(
    State(state): State<AppState>,
    auth: Auth,
) -> ApiResult<Json<JsonValue>> {
    let profile = state
        .db
        .profiles
        .get(auth.user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("profile {}", auth.user_id)))?;
    Ok(Json(serde_json::to_value(profile.memory_profile).map_err(Error::from)?))
}

/// `GET /api/v1/user/memory/summary` — bucket counts and freshness.
pub async fn memory_summary(
    State(state): State<AppState>,
    auth: Auth,
) -> ApiResult<Json<JsonValue>> {
    let profile = state
        .db
        .profiles
        .get(auth.user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("profile {}", auth.user_id)))?;
    let memory = &profile.memory_profile;

    Ok(Json(json!({
        "total_entries": memory.total_entries(),
        "buckets": {
            "preferences": memory.preferences.len(),
            "facts": memory.facts.len(),
            "context": memory.context.len(),
            "insights": memory.insights.len(),
        },
        "last_consolidated": memory.last_consolidated,
        "consolidation_settings": memory.consolidation_settings,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub auto_consolidate: Option<bool>,
    #[serde(default)]
    pub consolidation_threshold: Option<f64>,
    #[serde(default)]
    pub max_memories_per_type: Option<usize>,
    #[serde(default)]
    pub consolidation_strategy: Option<ConsolidationStrategy>,
}

/// `PUT /api/v1/user/memory/settings`
pub async fn update_settings(
    State(state): State<AppState>,
    auth: Auth,
    Json(req): Json<UpdateSettingsRequest>,
) -> ApiResult<Json<JsonValue>> {
    if let Some(threshold) = req.consolidation_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(
                "consolidation_threshold must be within [0, 1]".to_string(),
            )
            .into());
        }
    }

    let profile = state
        .db
        .profiles
        .get(auth.user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("profile {}", auth.user_id)))?;

    let mut memory = profile.memory_profile;
    let settings = &mut memory.consolidation_settings;
    if let Some(auto) = req.auto_consolidate {
        settings.auto_consolidate = auto;
    }
    if let Some(threshold) = req.consolidation_threshold {
        settings.consolidation_threshold = threshold;
    }
    if let Some(max) = req.max_memories_per_type {
        settings.max_memories_per_type = max.max(1);
    }
    if let Some(strategy) = req.consolidation_strategy {
        settings.consolidation_strategy = strategy;
    }

    state
        .db
        .profiles
        .save_memory_profile(auth.user_id, &memory)
        .await?;

    Ok(Json(serde_json::to_value(memory.consolidation_settings).map_err(Error::from)?))
}
