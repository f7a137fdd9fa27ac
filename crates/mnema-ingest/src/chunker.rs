//! Token-aware recursive text splitter with overlap.
//!
//! Splits at the coarsest separator that keeps pieces under the target
//! size, falling through paragraph → line → sentence → clause → word →
//! character boundaries. Adjacent chunks share an overlap tail so no
//! retrieval hit loses its surrounding context.

use mnema_core::{defaults, estimate_chunk_tokens};

/// Separators tried in order, coarsest first. The empty separator is the
/// terminal fallback: split every `chunk_size` characters mid-token.
pub const SEPARATORS: [&str; 7] = ["\n\n", "\n", ". ", "; ", ", ", " ", ""];

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap characters between adjacent chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            chunk_overlap: defaults::CHUNK_OVERLAP,
        }
    }
}

/// One produced chunk, ready for embedding and persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub chunk_index: i32,
    pub chunk_text: String,
    /// Character count of `chunk_text`.
    pub chunk_size: i32,
    pub estimated_tokens: i32,
}

/// Recursive character splitter.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkerConfig,
}

impl RecursiveChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// The method label persisted on chunks.
    pub fn method(&self) -> &'static str {
        "recursive"
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into ordered overlapping chunks. Empty input yields
    /// zero chunks.
    pub fn chunk(&self, text: &str) -> Vec<ChunkPiece> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return vec![];
        }

        let pieces = split_recursive(trimmed, self.config.chunk_size, &SEPARATORS);
        let merged = self.merge_pieces(pieces);

        merged
            .into_iter()
            .enumerate()
            .map(|(i, chunk_text)| {
                let chunk_size = chunk_text.chars().count() as i32;
                ChunkPiece {
                    chunk_index: i as i32,
                    estimated_tokens: estimate_chunk_tokens(chunk_size as usize),
                    chunk_text,
                    chunk_size,
                }
            })
            .collect()
    }

    /// Greedily pack pieces into chunks near the target size, carrying an
    /// overlap tail from chunk to chunk.
    fn merge_pieces(&self, pieces: Vec<String>) -> Vec<String> {
        let hard_cap =
            (self.config.chunk_size as f64 * defaults::CHUNK_HARD_CAP_FACTOR) as usize;
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            let current_chars = current.chars().count();
            let piece_chars = piece.chars().count();

            if current_chars > 0 && current_chars + piece_chars > self.config.chunk_size {
                chunks.push(current.trim().to_string());
                current = overlap_tail(&current, self.config.chunk_overlap);
            }
            current.push_str(&piece);

            // A single oversized piece can only come from degenerate
            // separator-free text; enforce the cap by force-splitting.
            while current.chars().count() > hard_cap {
                let head: String = current.chars().take(self.config.chunk_size).collect();
                let rest: String = current.chars().skip(self.config.chunk_size).collect();
                chunks.push(head.trim().to_string());
                let tail = overlap_tail(&chunks[chunks.len() - 1], self.config.chunk_overlap);
                current = format!("{}{}", tail, rest);
            }
        }

        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        chunks.retain(|c| !c.is_empty());
        chunks
    }
}

/// Split into pieces no longer than `target`, trying separators in order.
/// Separators stay attached to the preceding piece.
fn split_recursive(text: &str, target: usize, separators: &[&str]) -> Vec<String> {
    if text.chars().count() <= target {
        return vec![text.to_string()];
    }

    let Some((separator, rest)) = separators.split_first() else {
        return vec![text.to_string()];
    };

    if separator.is_empty() {
        // Terminal fallback: fixed-width slices at char boundaries.
        let chars: Vec<char> = text.chars().collect();
        return chars
            .chunks(target.max(1))
            .map(|c| c.iter().collect())
            .collect();
    }

    if !text.contains(separator) {
        return split_recursive(text, target, rest);
    }

    let mut pieces = Vec::new();
    for part in split_keep_separator(text, separator) {
        if part.chars().count() <= target {
            pieces.push(part);
        } else {
            pieces.extend(split_recursive(&part, target, rest));
        }
    }
    pieces
}

/// Split on `separator`, keeping it attached to the left side.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining = text;
    while let Some(pos) = remaining.find(separator) {
        let end = pos + separator.len();
        parts.push(remaining[..end].to_string());
        remaining = &remaining[end..];
    }
    if !remaining.is_empty() {
        parts.push(remaining.to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// The last `overlap` characters of a chunk, cut at a char boundary.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    let chars: Vec<char> = chunk.chars().collect();
    if chars.len() <= overlap {
        return chunk.to_string();
    }
    chars[chars.len() - overlap..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> RecursiveChunker {
        RecursiveChunker::with_defaults()
    }

    #[test]
    fn test_empty_input_returns_no_chunks() {
        assert!(chunker().chunk("").is_empty());
        assert!(chunker().chunk("   \n\n  ").is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let chunks = chunker().chunk("A short note.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].chunk_text, "A short note.");
        assert_eq!(chunks[0].chunk_size, 13);
    }

    #[test]
    fn test_indices_are_contiguous_from_zero() {
        let text = "word ".repeat(2000);
        let chunks = chunker().chunk(&text);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
        }
    }

    #[test]
    fn test_no_chunk_exceeds_hard_cap() {
        let hard_cap = (defaults::CHUNK_SIZE as f64 * defaults::CHUNK_HARD_CAP_FACTOR) as i32;
        for text in [
            "lorem ipsum dolor sit amet. ".repeat(400),
            "x".repeat(10_000),
            "para\n\n".repeat(1000),
        ] {
            for chunk in chunker().chunk(&text) {
                assert!(
                    chunk.chunk_size <= hard_cap,
                    "chunk of {} chars exceeds cap {}",
                    chunk.chunk_size,
                    hard_cap
                );
            }
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let para = "a".repeat(800);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = chunker().chunk(&text);
        // Each 800-char paragraph fits a chunk; none should be glued into
        // a mid-paragraph split.
        assert!(chunks.iter().all(|c| c.chunk_size as usize <= 1500));
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn test_adjacent_chunks_overlap() {
        let text = "sentence number one here. ".repeat(200);
        let chunks = chunker().chunk(&text);
        assert!(chunks.len() > 1);

        let first_tail: String = chunks[0]
            .chunk_text
            .chars()
            .rev()
            .take(50)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        assert!(
            chunks[1].chunk_text.contains(first_tail.trim()),
            "second chunk should repeat the first chunk's tail"
        );
    }

    #[test]
    fn test_separator_free_text_splits_mid_token() {
        let text = "字".repeat(5000);
        let chunks = chunker().chunk(&text);
        assert!(chunks.len() > 1);
        let hard_cap = (defaults::CHUNK_SIZE as f64 * defaults::CHUNK_HARD_CAP_FACTOR) as i32;
        assert!(chunks.iter().all(|c| c.chunk_size <= hard_cap));
    }

    #[test]
    fn test_estimated_tokens_clamped() {
        let chunks = chunker().chunk("tiny");
        assert_eq!(chunks[0].estimated_tokens, 50);

        let text = "word ".repeat(400);
        for chunk in chunker().chunk(&text) {
            assert!(chunk.estimated_tokens >= 50);
            assert!(chunk.estimated_tokens <= 2000);
        }
    }

    #[test]
    fn test_chunk_sizes_count_chars_not_bytes() {
        let chunks = chunker().chunk("知识服务");
        assert_eq!(chunks[0].chunk_size, 4);
    }

    #[test]
    fn test_split_keep_separator() {
        let parts = split_keep_separator("a. b. c", ". ");
        assert_eq!(parts, vec!["a. ", "b. ", "c"]);
    }

    #[test]
    fn test_overlap_tail_char_boundary_safe() {
        let tail = overlap_tail("知识服务平台", 3);
        assert_eq!(tail, "务平台");
    }

    #[test]
    fn test_overlap_tail_shorter_than_overlap() {
        assert_eq!(overlap_tail("ab", 200), "ab");
    }
}
