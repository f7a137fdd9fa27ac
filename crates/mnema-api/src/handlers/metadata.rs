//! Metadata preview and summary-cache polling handlers.

use axum::extract::{Path, State};
use axum::{Form, Json};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use mnema_core::MetadataPreview;
use mnema_ingest::SummaryStatus;

use crate::auth::Auth;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExtractForm {
    pub url: String,
}

/// `POST /api/v1/metadata/extract` — synchronous preview plus a
/// background summary task that warms the per-URL cache.
pub async fn extract_metadata(
    State(state): State<AppState>,
    _auth: Auth,
    Form(form): Form<ExtractForm>,
) -> ApiResult<Json<MetadataPreview>> {
    let preview = state.pipeline.preview_metadata(form.url.trim()).await?;
    Ok(Json(preview))
}

/// `GET /api/v1/metadata/summary/:url` — summary cache status for a
/// (percent-encoded) URL.
pub async fn summary_status(
    State(state): State<AppState>,
    _auth: Auth,
    Path(encoded_url): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let url = percent_decode_str(&encoded_url)
        .decode_utf8_lossy()
        .into_owned();

    let body = match state.pipeline.summary_cache().get(&url) {
        None => json!({ "status": "not_found" }),
        Some(SummaryStatus::Generating) => json!({ "status": "generating" }),
        Some(SummaryStatus::Completed { summary }) => {
            json!({ "status": "completed", "summary": summary })
        }
        Some(SummaryStatus::Failed { error }) => {
            json!({ "status": "failed", "error": error })
        }
    };

    Ok(Json(body))
}
