//! Insight CRUD, listing, and sync handlers.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use mnema_core::{
    ChunkRepository, ContentRepository, CreateInsightRequest, Error, IncrementalSyncResponse,
    InsightRepository, InsightWithTags, ListInsightsRequest, TagRepository, UpdateInsightRequest,
};
use mnema_db::PgInsightRepository;

use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /api/v1/insights` — create the skeleton row, start ingestion.
pub async fn create_insight(
    State(state): State<AppState>,
    auth: Auth,
    Json(req): Json<CreateInsightRequest>,
) -> ApiResult<Json<InsightWithTags>> {
    let insight = state.pipeline.create_insight(auth.user_id, &req).await?;
    state.pipeline.spawn_ingest(insight.insight.id);
    Ok(Json(insight))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub search: Option<String>,
}

/// `GET /api/v1/insights` — paginated listing.
pub async fn list_insights(
    State(state): State<AppState>,
    auth: Auth,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JsonValue>> {
    let req = ListInsightsRequest {
        user_id: auth.user_id,
        search: query.search,
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(mnema_core::defaults::PAGE_LIMIT),
    };
    let response = state.db.insights.list(&req).await?;
    Ok(Json(json!({
        "insights": response.insights,
        "pagination": response.pagination,
    })))
}

/// `GET /api/v1/insights/all` — the whole corpus, newest first.
pub async fn list_all_insights(
    State(state): State<AppState>,
    auth: Auth,
) -> ApiResult<Json<JsonValue>> {
    let insights = state.db.insights.list_all(auth.user_id).await?;
    Ok(Json(json!({ "insights": insights })))
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub etag: Option<String>,
}

/// `GET /api/v1/insights/sync/incremental` — ETag-gated delta sync.
///
/// An unchanged corpus answers 200 with an empty array and the same ETag.
pub async fn incremental_sync(
    State(state): State<AppState>,
    auth: Auth,
    Query(query): Query<SyncQuery>,
) -> ApiResult<(HeaderMap, Json<IncrementalSyncResponse>)> {
    let (max_updated, count) = state.db.insights.sync_watermark(auth.user_id).await?;
    let etag = PgInsightRepository::compute_etag(auth.user_id, max_updated, count);

    let mut headers = HeaderMap::new();
    headers.insert("ETag", etag.parse().expect("hex etag is a valid header"));

    if query.etag.as_deref() == Some(etag.as_str()) {
        return Ok((
            headers,
            Json(IncrementalSyncResponse {
                insights: vec![],
                etag,
            }),
        ));
    }

    let since = query
        .since
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch exists"));
    let insights = state.db.insights.changed_since(auth.user_id, since).await?;
    let insights = insights
        .into_iter()
        .map(|insight| InsightWithTags {
            insight,
            tags: vec![],
        })
        .collect();

    Ok((headers, Json(IncrementalSyncResponse { insights, etag })))
}

/// `GET /api/v1/insights/:id` — owner-only detail with tags and content.
pub async fn get_insight(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    let insight = state.db.insights.get_owned(id, auth.user_id).await?;
    let tags = state.db.tags.tags_for_insight(id).await?;
    let content = state.db.contents.get(id).await?;

    Ok(Json(json!({
        "insight": InsightWithTags { insight, tags },
        "summary": content.as_ref().and_then(|c| c.summary.clone()),
    })))
}

/// `PUT /api/v1/insights/:id` — owner-only update.
pub async fn update_insight(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateInsightRequest>,
) -> ApiResult<Json<InsightWithTags>> {
    let insight = state.db.insights.update(id, auth.user_id, &req).await?;

    if let Some(ref tag_ids) = req.tag_ids {
        state.db.tags.attach(id, auth.user_id, tag_ids).await?;
    }
    let tags = state.db.tags.tags_for_insight(id).await?;

    Ok(Json(InsightWithTags { insight, tags }))
}

/// `DELETE /api/v1/insights/:id` — cascades to contents, chunks, links.
pub async fn delete_insight(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    // get_owned distinguishes 403 from 404 before the delete runs.
    state.db.insights.get_owned(id, auth.user_id).await?;
    state.db.insights.delete(id, auth.user_id).await?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /api/v1/insight-chunks/:id/summary` — chunk/embedding counters.
pub async fn chunk_summary(
    State(state): State<AppState>,
    auth: Auth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JsonValue>> {
    state.db.insights.get_owned(id, auth.user_id).await?;
    let summary = state.db.chunks.summary(id).await?;
    Ok(Json(serde_json::to_value(summary).map_err(Error::from)?))
}
