//! SSE stream parsing for OpenAI-compatible streaming responses.
//!
//! Upstream chunks can split SSE events across network frames, so a small
//! line buffer carries incomplete lines between chunks.

use futures::{Stream, StreamExt};

use mnema_core::{Error, Result, StreamDelta, TokenStream};

use crate::types::StreamChunk;

/// Parse an SSE byte stream into ordered [`StreamDelta`] items.
pub fn parse_sse_stream(
    stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> TokenStream {
    let delta_stream = stream
        .map(|chunk| chunk.map_err(|e| Error::Inference(format!("Stream error: {}", e))))
        .scan(String::new(), |buffer, result| {
            let out = match result {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    let (deltas, rest) = drain_complete_lines(buffer);
                    *buffer = rest;
                    deltas
                }
                Err(e) => vec![Err(e)],
            };
            futures::future::ready(Some(futures::stream::iter(out)))
        })
        .flatten();

    Box::pin(delta_stream)
}

/// Split the buffer at line boundaries, parse every complete line, and
/// return the unterminated remainder.
fn drain_complete_lines(buffer: &str) -> (Vec<Result<StreamDelta>>, String) {
    let mut deltas = Vec::new();

    let (complete, rest) = match buffer.rfind('\n') {
        Some(pos) => (&buffer[..=pos], &buffer[pos + 1..]),
        None => ("", buffer),
    };

    for line in complete.lines() {
        if let Some(delta) = parse_sse_line(line) {
            deltas.push(delta);
        }
    }

    (deltas, rest.to_string())
}

/// Parse a single SSE line into a delta, if it carries one.
fn parse_sse_line(line: &str) -> Option<Result<StreamDelta>> {
    let line = line.trim();

    // Skip empty lines and comments
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    // End-of-stream marker carries no content of its own
    if line == "data: [DONE]" {
        return None;
    }

    let data = line.strip_prefix("data: ")?;

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(usage) = chunk.usage {
                return Some(Ok(StreamDelta::Done(usage.into())));
            }

            let content = chunk.joined_content();
            if content.is_empty() {
                None
            } else {
                Some(Ok(StreamDelta::Content(content)))
            }
        }
        Err(e) => Some(Err(Error::Inference(format!(
            "Failed to parse SSE chunk: {}",
            e
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_of(delta: Result<StreamDelta>) -> String {
        match delta.unwrap() {
            StreamDelta::Content(c) => c,
            other => panic!("expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_line_with_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"the saved"},"finish_reason":null}]}"#;
        assert_eq!(content_of(parse_sse_line(line).unwrap()), "the saved");
    }

    #[test]
    fn test_parse_line_done_marker() {
        assert!(parse_sse_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_line_empty_delta() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":null}]}"#;
        assert!(parse_sse_line(line).is_none());
    }

    #[test]
    fn test_parse_line_role_only() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        assert!(parse_sse_line(line).is_none());
    }

    #[test]
    fn test_parse_line_comment_and_empty() {
        assert!(parse_sse_line(": keepalive").is_none());
        assert!(parse_sse_line("").is_none());
    }

    #[test]
    fn test_parse_line_invalid_json() {
        let result = parse_sse_line("data: {invalid json}").unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_line_usage_chunk() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#;
        match parse_sse_line(line).unwrap().unwrap() {
            StreamDelta::Done(usage) => {
                assert_eq!(usage.prompt_tokens, 7);
                assert_eq!(usage.completion_tokens, 3);
            }
            other => panic!("expected usage, got {:?}", other),
        }
    }

    #[test]
    fn test_drain_keeps_incomplete_tail() {
        let buffer = "data: [DONE]\ndata: {\"id\"";
        let (deltas, rest) = drain_complete_lines(buffer);
        assert!(deltas.is_empty());
        assert_eq!(rest, "data: {\"id\"");
    }

    #[test]
    fn test_drain_multiple_lines() {
        let buffer = concat!(
            r#"data: {"choices":[{"delta":{"content":"the saved"},"finish_reason":null}]}"#,
            "\n\n",
            r#"data: {"choices":[{"delta":{"content":" note covers it"},"finish_reason":null}]}"#,
            "\n",
        );
        let (deltas, rest) = drain_complete_lines(buffer);
        assert_eq!(deltas.len(), 2);
        assert!(rest.is_empty());
        let joined: String = deltas.into_iter().map(content_of).collect();
        assert_eq!(joined, "the saved note covers it");
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_events() {
        // One SSE event split across two network chunks.
        let part1 = bytes::Bytes::from_static(b"data: {\"id\":\"t\",\"choices\":[{\"index\":0,");
        let part2 = bytes::Bytes::from_static(
            b"\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\ndata: [DONE]\n\n",
        );
        let upstream = futures::stream::iter(vec![
            Ok::<_, reqwest::Error>(part1),
            Ok::<_, reqwest::Error>(part2),
        ]);

        let deltas: Vec<_> = parse_sse_stream(upstream).collect().await;
        assert_eq!(deltas.len(), 1);
        match deltas.into_iter().next().unwrap().unwrap() {
            StreamDelta::Content(c) => assert_eq!(c, "Hi"),
            other => panic!("expected content, got {:?}", other),
        }
    }
}
