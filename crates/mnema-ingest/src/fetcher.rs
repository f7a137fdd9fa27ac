//! Page fetcher with bounded time and size.
//!
//! Fetch failures are never fatal to ingestion: the orchestrator decides
//! whether an insight can still be created from user-provided fields, so
//! every failure mode maps to a typed [`FetchError`].

use futures::StreamExt;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use tracing::{debug, warn};

use mnema_core::defaults;

/// Typed fetch failure. All variants are non-fatal to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// DNS/connect failure.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// Connect or total deadline exceeded.
    #[error("timed out")]
    Timeout,
    /// Response exceeded the configured size ceiling.
    #[error("response larger than {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
    /// Non-success HTTP status.
    #[error("bad status: {0}")]
    BadStatus(u16),
    /// Content type is not text/HTML.
    #[error("not html: {0}")]
    NotHtml(String),
}

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,
    /// URL after redirects.
    pub final_url: String,
    pub content_type: String,
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    pub max_redirects: usize,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(defaults::FETCH_CONNECT_TIMEOUT_SECS),
            total_timeout: Duration::from_secs(defaults::FETCH_TOTAL_TIMEOUT_SECS),
            max_redirects: defaults::FETCH_MAX_REDIRECTS,
            max_bytes: defaults::FETCH_MAX_BYTES,
            user_agent: defaults::FETCH_USER_AGENT.to_string(),
        }
    }
}

/// HTML fetcher. Follows redirects, enforces deadlines and a body size
/// ceiling, does not persist cookies.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: FetcherConfig,
}

impl Fetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self { client, config }
    }

    /// Create a fetcher with defaults.
    pub fn with_defaults() -> Self {
        Self::new(FetcherConfig::default())
    }

    /// Fetch a URL, returning its HTML or a typed failure.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        debug!(
            subsystem = "ingest",
            component = "fetcher",
            url = %url,
            "Fetching page"
        );

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else if e.is_redirect() {
                FetchError::BadStatus(310)
            } else {
                FetchError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        if !is_text_content_type(&content_type) {
            return Err(FetchError::NotHtml(content_type));
        }

        // Declared length is a fast reject; the stream check below is the
        // real guard against lying servers.
        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_bytes {
                return Err(FetchError::TooLarge {
                    max_bytes: self.config.max_bytes,
                });
            }
        }

        let final_url = response.url().to_string();

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Unreachable(e.to_string())
                }
            })?;
            if body.len() + chunk.len() > self.config.max_bytes {
                warn!(
                    subsystem = "ingest",
                    component = "fetcher",
                    url = %url,
                    max_bytes = self.config.max_bytes,
                    "Aborting oversized response"
                );
                return Err(FetchError::TooLarge {
                    max_bytes: self.config.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body).into_owned();

        debug!(
            subsystem = "ingest",
            component = "fetcher",
            url = %url,
            final_url = %final_url,
            bytes = html.len(),
            "Fetch complete"
        );

        Ok(FetchedPage {
            html,
            final_url,
            content_type,
        })
    }
}

/// Accept text/html and friends; reject binaries and JSON APIs.
fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/html")
        || ct.starts_with("application/xhtml")
        || ct.starts_with("text/plain")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_text_content_types() {
        assert!(is_text_content_type("text/html"));
        assert!(is_text_content_type("text/html; charset=utf-8"));
        assert!(is_text_content_type("application/xhtml+xml"));
        assert!(is_text_content_type("TEXT/HTML"));
    }

    #[test]
    fn test_binary_content_types_rejected() {
        assert!(!is_text_content_type("application/pdf"));
        assert!(!is_text_content_type("image/png"));
        assert!(!is_text_content_type("application/json"));
    }

    #[tokio::test]
    async fn test_fetch_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>hello</body></html>")
                    .insert_header("content-type", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::with_defaults();
        let page = fetcher
            .fetch(&format!("{}/article", server.uri()))
            .await
            .unwrap();
        assert!(page.html.contains("hello"));
        assert!(page.content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_fetch_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::with_defaults();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert_eq!(err, FetchError::BadStatus(404));
    }

    #[tokio::test]
    async fn test_fetch_not_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .insert_header("content-type", "application/json"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::with_defaults();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::NotHtml(_)));
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("x".repeat(4096))
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let config = FetcherConfig {
            max_bytes: 1024,
            ..FetcherConfig::default()
        };
        let fetcher = Fetcher::new(config);
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let fetcher = Fetcher::with_defaults();
        // Reserved TEST-NET address, nothing listens there.
        let err = fetcher
            .fetch("http://192.0.2.1:9/never")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Unreachable(_) | FetchError::Timeout
        ));
    }
}
