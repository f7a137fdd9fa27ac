//! Bearer-token authentication.
//!
//! Tokens are opaque to this service. A chain of [`TokenVerifier`]s is
//! tried in declared order; the first one that resolves a user id wins.
//! Production runs the auth-backend verifier; local development can
//! prepend the dev verifier, which accepts `<user_id>:<anything>`.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use mnema_core::{Error, Result};

use crate::error::ApiError;
use crate::state::AppState;

/// One way of turning a bearer token into a user id.
///
/// `Ok(None)` means "not my kind of token, try the next verifier";
/// errors abort the chain.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Option<Uuid>>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Resolves opaque tokens against the external auth backend.
pub struct AuthBackendVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl AuthBackendVerifier {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client, base_url }
    }
}

#[async_trait]
impl TokenVerifier for AuthBackendVerifier {
    async fn verify(&self, token: &str) -> Result<Option<Uuid>> {
        let response = self
            .client
            .get(format!(
                "{}/auth/v1/user",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Request(format!("auth backend unreachable: {}", e)))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Request(format!(
                "auth backend returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Request(format!("unparseable auth response: {}", e)))?;

        Ok(body
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok()))
    }

    fn name(&self) -> &'static str {
        "auth_backend"
    }
}

/// Development-only verifier accepting `<user_id>:<anything>`.
pub struct DevTokenVerifier;

#[async_trait]
impl TokenVerifier for DevTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<Uuid>> {
        let Some((user_part, _)) = token.split_once(':') else {
            return Ok(None);
        };
        Ok(Uuid::parse_str(user_part).ok())
    }

    fn name(&self) -> &'static str {
        "dev_token"
    }
}

/// The ordered verifier chain.
pub struct TokenResolver {
    verifiers: Vec<Arc<dyn TokenVerifier>>,
}

impl TokenResolver {
    pub fn new(verifiers: Vec<Arc<dyn TokenVerifier>>) -> Self {
        Self { verifiers }
    }

    /// Resolve a token to a user id, trying verifiers in order.
    pub async fn resolve(&self, token: &str) -> Result<Uuid> {
        for verifier in &self.verifiers {
            match verifier.verify(token).await {
                Ok(Some(user_id)) => {
                    debug!(
                        subsystem = "api",
                        component = "auth",
                        verifier = verifier.name(),
                        user_id = %user_id,
                        "Token resolved"
                    );
                    return Ok(user_id);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        subsystem = "api",
                        component = "auth",
                        verifier = verifier.name(),
                        error = %e,
                        "Verifier error"
                    );
                    return Err(e);
                }
            }
        }
        Err(Error::Unauthorized("invalid bearer token".to_string()))
    }
}

/// Authenticated principal extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct Auth {
    pub user_id: Uuid,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| {
                ApiError(Error::Unauthorized(
                    "missing Authorization header".to_string(),
                ))
            })?;

        let user_id = state.token_resolver.resolve(token).await?;
        Ok(Auth { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_verifier_accepts_uuid_prefix() {
        let user_id = Uuid::new_v4();
        let token = format!("{}:whatever", user_id);
        let resolved = DevTokenVerifier.verify(&token).await.unwrap();
        assert_eq!(resolved, Some(user_id));
    }

    #[tokio::test]
    async fn test_dev_verifier_rejects_plain_tokens() {
        assert_eq!(DevTokenVerifier.verify("opaque-token").await.unwrap(), None);
        assert_eq!(DevTokenVerifier.verify("not-a-uuid:x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolver_tries_verifiers_in_order() {
        struct Always(Uuid);
        #[async_trait]
        impl TokenVerifier for Always {
            async fn verify(&self, _: &str) -> Result<Option<Uuid>> {
                Ok(Some(self.0))
            }
            fn name(&self) -> &'static str {
                "always"
            }
        }

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let resolver =
            TokenResolver::new(vec![Arc::new(Always(first)), Arc::new(Always(second))]);
        assert_eq!(resolver.resolve("t").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_resolver_exhausted_is_unauthorized() {
        let resolver = TokenResolver::new(vec![Arc::new(DevTokenVerifier)]);
        let err = resolver.resolve("opaque").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }
}
