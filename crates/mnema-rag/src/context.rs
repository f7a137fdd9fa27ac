//! RAG context assembly.
//!
//! Formats retrieved chunks into the citation-numbered, token-budgeted
//! block the chat prompt embeds. The numbering here is what the system
//! prompt tells the model to cite as `[n]`.

use std::collections::BTreeSet;
use tracing::debug;

use mnema_core::{defaults, estimate_chunk_tokens, RagChunk, RagContext};

/// Context builder configuration.
#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    /// Token budget for the assembled block.
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: defaults::RAG_MAX_CONTEXT_TOKENS,
        }
    }
}

impl ContextConfig {
    /// Read the `RAG_MAX_CONTEXT_TOKENS` override.
    pub fn from_env() -> Self {
        Self {
            max_tokens: std::env::var("RAG_MAX_CONTEXT_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::RAG_MAX_CONTEXT_TOKENS),
        }
    }
}

/// Build the citation-indexed context block from score-ordered chunks.
///
/// Chunks accumulate until the token budget is exceeded; at least one
/// chunk is always included when any were retrieved, even if it alone
/// blows the budget. Zero chunks produce an empty context.
pub fn build_context(chunks: &[RagChunk], config: ContextConfig) -> RagContext {
    if chunks.is_empty() {
        return RagContext::default();
    }

    let mut ordered: Vec<&RagChunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.insight_id.cmp(&b.insight_id))
            .then(a.chunk_index.cmp(&b.chunk_index))
    });

    let mut parts: Vec<String> = Vec::new();
    let mut included: Vec<RagChunk> = Vec::new();
    let mut total_tokens = 0usize;

    for (i, chunk) in ordered.iter().enumerate() {
        let chunk_tokens = estimate_chunk_tokens(chunk.chunk_text.chars().count()) as usize;
        if !included.is_empty() && total_tokens + chunk_tokens > config.max_tokens {
            debug!(
                subsystem = "rag",
                component = "context",
                context_tokens = total_tokens,
                budget = config.max_tokens,
                "Token budget reached, truncating context"
            );
            break;
        }

        let mut block = format!(
            "【{} | {:.2}】{}\n来源标题: {}\n来源链接: {}",
            i + 1,
            chunk.score,
            chunk.chunk_text,
            chunk.insight_title.as_deref().unwrap_or(""),
            chunk.insight_url,
        );
        if let Some(summary) = chunk
            .insight_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            block.push_str(&format!("\n内容摘要: {}", summary));
        }

        total_tokens += chunk_tokens;
        parts.push(block);
        included.push((*chunk).clone());
    }

    let extracted_keywords = extract_keywords(&included);

    RagContext {
        chunks: included,
        context_text: parts.join("\n\n"),
        total_context_tokens: total_tokens,
        extracted_keywords,
    }
}

/// Unique source domains and title tokens, for audit logging.
fn extract_keywords(chunks: &[RagChunk]) -> Vec<String> {
    let mut keywords: BTreeSet<String> = BTreeSet::new();

    for chunk in chunks {
        if let Ok(parsed) = url::Url::parse(&chunk.insight_url) {
            if let Some(host) = parsed.host_str() {
                keywords.insert(host.to_string());
            }
        }
        if let Some(ref title) = chunk.insight_title {
            for token in title.split_whitespace() {
                let token = token
                    .trim_matches(|c: char| c.is_ascii_punctuation())
                    .to_lowercase();
                if token.chars().count() >= 3 {
                    keywords.insert(token);
                }
            }
        }
    }

    keywords.into_iter().collect()
}
