//! Brevo transactional email client.
//!
//! Sends template emails via `POST /v3/smtp/email` with the digest
//! payload under `params`. Auth and rate-limit failures map into the
//! shared error taxonomy so the dispatcher's retry budget applies.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use mnema_core::{defaults, Error, Result};

/// Default Brevo API endpoint.
pub const DEFAULT_BREVO_URL: &str = "https://api.brevo.com/v3";

/// Brevo client configuration.
#[derive(Debug, Clone)]
pub struct BrevoConfig {
    pub base_url: String,
    pub api_key: String,
    /// Transactional template id used for weekly digests.
    pub digest_template_id: i64,
    pub timeout: Duration,
}

impl BrevoConfig {
    /// Read `BREVO_API_KEY` / `BREVO_TEMPLATE_ID` / `BREVO_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BREVO_API_KEY")
            .map_err(|_| Error::Config("BREVO_API_KEY is not set".to_string()))?;
        let digest_template_id = std::env::var("BREVO_TEMPLATE_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Config("BREVO_TEMPLATE_ID is not set".to_string()))?;

        Ok(Self {
            base_url: std::env::var("BREVO_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BREVO_URL.to_string()),
            api_key,
            digest_template_id,
            timeout: Duration::from_secs(defaults::EMAIL_TIMEOUT_SECS),
        })
    }
}

#[derive(Debug, Serialize)]
struct Recipient {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateEmailRequest {
    to: Vec<Recipient>,
    template_id: i64,
    params: JsonValue,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    message_id: String,
}

/// Brevo API client.
pub struct BrevoClient {
    client: Client,
    config: BrevoConfig,
}

impl BrevoClient {
    pub fn new(config: BrevoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Email(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "digest",
            component = "brevo",
            base_url = %config.base_url,
            template_id = config.digest_template_id,
            "Initializing Brevo client"
        );

        Ok(Self { client, config })
    }

    /// The configured digest template id.
    pub fn digest_template_id(&self) -> i64 {
        self.config.digest_template_id
    }

    /// Send a template email; returns the provider message id.
    pub async fn send_template(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        template_id: i64,
        params: JsonValue,
        headers: HashMap<String, String>,
    ) -> Result<String> {
        let request = TemplateEmailRequest {
            to: vec![Recipient {
                email: to_email.to_string(),
                name: to_name.map(String::from),
            }],
            template_id,
            params,
            headers,
        };

        let response = self
            .client
            .post(format!(
                "{}/smtp/email",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Upstream {
                    message: format!("brevo auth failed: {}", body),
                    retryable: false,
                },
                StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                    retry_after_secs: 60,
                },
                s if s.is_server_error() => Error::Upstream {
                    message: format!("brevo {}: {}", s, body),
                    retryable: true,
                },
                s => Error::Email(format!("brevo {}: {}", s, body)),
            });
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Email(format!("unparseable brevo response: {}", e)))?;

        debug!(
            subsystem = "digest",
            component = "brevo",
            message_id = %parsed.message_id,
            "Template email accepted"
        );

        Ok(parsed.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> BrevoConfig {
        BrevoConfig {
            base_url,
            api_key: "test-key".to_string(),
            digest_template_id: 7,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_send_template_puts_params_flat_on_the_wire() {
        let server = MockServer::start().await;
        // The params argument lands directly under "params" — a template
        // referencing {{params.user.email}} must resolve.
        Mock::given(method("POST"))
            .and(path("/smtp/email"))
            .and(header("api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "templateId": 7,
                "to": [{"email": "u@example.com", "name": "U"}],
                "params": {
                    "user": {"email": "u@example.com"},
                    "ai_summary": "Two reads this week."
                }
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"messageId": "<msg-1@brevo>"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = BrevoClient::new(config(server.uri())).unwrap();
        let message_id = client
            .send_template(
                "u@example.com",
                Some("U"),
                7,
                serde_json::json!({
                    "user": {"email": "u@example.com"},
                    "ai_summary": "Two reads this week."
                }),
                HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(message_id, "<msg-1@brevo>");
    }

    #[tokio::test]
    async fn test_send_template_auth_failure_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = BrevoClient::new(config(server.uri())).unwrap();
        let err = client
            .send_template("u@example.com", None, 7, serde_json::json!({}), HashMap::new())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_send_template_server_error_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = BrevoClient::new(config(server.uri())).unwrap();
        let err = client
            .send_template("u@example.com", None, 7, serde_json::json!({}), HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
