//! Integration tests for the OpenAI-compatible client against a mock
//! HTTP server.

use std::time::Duration;

use futures::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use mnema_core::{
    EmbeddingBackend, GenerationBackend, PromptMessage, StreamDelta, StreamingGeneration,
};
use mnema_inference::{OpenAiClient, OpenAiConfig};

fn client_for(server: &MockServer) -> OpenAiClient {
    let config = OpenAiConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        completion_timeout: Duration::from_secs(5),
        embedding_timeout: Duration::from_secs(5),
        ..OpenAiConfig::default()
    };
    OpenAiClient::new(config).unwrap()
}

fn embedding_body(count: usize) -> serde_json::Value {
    let data: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "embedding": vec![0.1f32; 1536],
                "index": count - 1 - i, // deliberately out of order
            })
        })
        .collect();
    serde_json::json!({
        "data": data,
        "model": "text-embedding-3-small",
        "usage": { "prompt_tokens": 4, "total_tokens": 4 }
    })
}

#[tokio::test]
async fn embeds_texts_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(2)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let vectors = client
        .embed_texts(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0].as_slice().len(), 1536);
}

#[tokio::test]
async fn embedding_batches_cap_at_96_inputs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(move |request: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let count = body["input"].as_array().unwrap().len();
            assert!(count <= 96, "batch of {count} exceeds the 96-input cap");
            ResponseTemplate::new(200).set_body_json(embedding_body(count))
        })
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let texts: Vec<String> = (0..100).map(|i| format!("text {i}")).collect();
    let vectors = client.embed_texts(&texts).await.unwrap();
    assert_eq!(vectors.len(), 100);
}

#[tokio::test]
async fn embedding_dimension_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
            "model": "text-embedding-3-small",
            "usage": { "prompt_tokens": 1, "total_tokens": 1 }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.embed_text("x").await.is_err());
}

#[tokio::test]
async fn generate_returns_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Grounded answer." },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49 }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let completion = client
        .generate(&[PromptMessage::user("explain attention")])
        .await
        .unwrap();
    assert_eq!(completion.content, "Grounded answer.");
    assert_eq!(completion.usage.prompt_tokens, 42);
    assert_eq!(completion.usage.completion_tokens, 7);
}

#[tokio::test]
async fn generate_retries_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-2",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "after retry" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let completion = client
        .generate(&[PromptMessage::user("hi")])
        .await
        .unwrap();
    assert_eq!(completion.content, "after retry");
}

#[tokio::test]
async fn generate_does_not_retry_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "message": "context length exceeded",
                "type": "invalid_request_error",
                "code": "context_length_exceeded"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .generate(&[PromptMessage::user("hi")])
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn streaming_yields_deltas_in_order() {
    let sse_body = concat!(
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"id\":\"c\",\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client
        .generate_stream(&[PromptMessage::user("hi")])
        .await
        .unwrap();

    let mut answer = String::new();
    let mut usage = None;
    while let Some(delta) = stream.next().await {
        match delta.unwrap() {
            StreamDelta::Content(c) => answer.push_str(&c),
            StreamDelta::Done(u) => usage = Some(u),
        }
    }
    assert_eq!(answer, "Hello world");
    let usage = usage.expect("usage chunk surfaces");
    assert_eq!(usage.prompt_tokens, 5);
    assert_eq!(usage.completion_tokens, 2);
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "message": "bad key", "type": "auth", "code": null }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.embed_text("x").await.unwrap_err();
    assert!(matches!(err, mnema_core::Error::Unauthorized(_)));
}
