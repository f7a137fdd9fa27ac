//! HTTP error envelope.
//!
//! Maps the core error taxonomy onto status codes and the JSON envelope
//! `{"success": false, "detail": "..."}`. Rate-limit responses carry a
//! `Retry-After` header.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use mnema_core::Error;

/// Wrapper turning core errors into responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self.0 {
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, None),
            Error::NotFound(_) | Error::InsightNotFound(_) | Error::SessionNotFound(_) => {
                (StatusCode::NOT_FOUND, None)
            }
            Error::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
            Error::RateLimited { retry_after_secs } => {
                (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_secs))
            }
            Error::Upstream { .. } | Error::Inference(_) | Error::Embedding(_) | Error::Email(_) => {
                (StatusCode::BAD_GATEWAY, None)
            }
            Error::Fetch(_) => (StatusCode::BAD_GATEWAY, None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        if status.is_server_error() {
            error!(
                subsystem = "api",
                status = status.as_u16(),
                error = %self.0,
                "Request failed"
            );
        }

        let detail = match status {
            // Internal details stay in the logs.
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.0.to_string(),
        };

        let mut response =
            (status, Json(json!({ "success": false, "detail": detail }))).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: Error) -> StatusCode {
        ApiError(e).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(Error::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(Error::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(Error::InsightNotFound(uuid::Uuid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::Validation("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(Error::RateLimited { retry_after_secs: 5 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(Error::Upstream {
                message: "x".into(),
                retryable: true
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError(Error::RateLimited { retry_after_secs: 7 }).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("7")
        );
    }

    #[test]
    fn test_retry_after_floor_is_one() {
        let response = ApiError(Error::RateLimited { retry_after_secs: 0 }).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("1")
        );
    }
}
