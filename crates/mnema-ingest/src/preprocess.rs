//! Key-content preprocessing before the summary call.
//!
//! Reduces an extracted body to its most information-bearing paragraphs so
//! the LLM summary prompt stays small without losing the article's core:
//!
//! 1. split into sentences (script-aware),
//! 2. rank sentences with a PageRank-style graph algorithm,
//! 3. score paragraphs by the key sentences they contain,
//! 4. select top paragraphs plus a context window.

use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use mnema_core::defaults;

/// Sentence ranking algorithm over the similarity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankAlgorithm {
    /// Word-overlap similarity with log-length normalization.
    TextRank,
    /// Cosine similarity over term-frequency vectors.
    LexRank,
}

impl RankAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankAlgorithm::TextRank => "textrank",
            RankAlgorithm::LexRank => "lexrank",
        }
    }
}

/// How much surrounding context survives selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessMode {
    /// Only the selected paragraphs.
    Strict,
    /// Selected paragraphs plus the context window.
    Balanced,
    /// Keep up to `preserve_ratio` of all paragraphs, ordered by score,
    /// emitted in original order.
    Preserve,
}

impl PreprocessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreprocessMode::Strict => "strict",
            PreprocessMode::Balanced => "balanced",
            PreprocessMode::Preserve => "preserve",
        }
    }
}

/// Preprocessor configuration.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub key_sentences: usize,
    pub top_k_paragraphs: usize,
    pub context_window: usize,
    pub mode: PreprocessMode,
    pub algorithm: RankAlgorithm,
    /// Only meaningful in preserve mode; clamped to [0.1, 1.0].
    pub preserve_ratio: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            key_sentences: defaults::PREPROCESS_KEY_SENTENCES,
            top_k_paragraphs: defaults::PREPROCESS_TOP_K_PARAGRAPHS,
            context_window: defaults::PREPROCESS_CONTEXT_WINDOW,
            mode: PreprocessMode::Balanced,
            algorithm: RankAlgorithm::TextRank,
            preserve_ratio: defaults::PREPROCESS_PRESERVE_RATIO,
        }
    }
}

/// Preprocessing output.
#[derive(Debug, Clone)]
pub struct ProcessedText {
    pub processed_text: String,
    pub method: String,
    pub algorithm: String,
    /// processed length / original length.
    pub compression_ratio: f64,
    pub paragraph_count: usize,
}

/// PageRank damping factor.
const DAMPING: f64 = 0.85;

/// Power-iteration rounds.
const RANK_ITERATIONS: usize = 30;

/// Convergence tolerance for early exit.
const RANK_TOLERANCE: f64 = 1e-4;

/// Word-overlap ratio above which a paragraph earns partial credit for a
/// key sentence it doesn't contain verbatim.
const PARTIAL_OVERLAP_RATIO: f64 = 0.6;

/// Key-content preprocessor.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(PreprocessConfig::default())
    }

    /// Reduce `text` to its key content.
    pub fn process(&self, text: &str) -> ProcessedText {
        let original_len = text.chars().count();
        let paragraphs = split_paragraphs(text);

        if paragraphs.len() <= self.config.top_k_paragraphs {
            // Nothing to trim; short bodies pass through untouched.
            return ProcessedText {
                processed_text: paragraphs.join("\n\n"),
                method: "passthrough".to_string(),
                algorithm: self.config.algorithm.as_str().to_string(),
                compression_ratio: 1.0,
                paragraph_count: paragraphs.len(),
            };
        }

        let sentences = split_sentences(text);
        let key_sentences = rank_sentences(&sentences, self.config.algorithm, self.config.key_sentences);
        let scores = score_paragraphs(&paragraphs, &key_sentences);

        let selected: BTreeSet<usize> = match self.config.mode {
            PreprocessMode::Strict => top_k_indices(&scores, self.config.top_k_paragraphs)
                .into_iter()
                .collect(),
            PreprocessMode::Balanced => {
                let mut selected = BTreeSet::new();
                for idx in top_k_indices(&scores, self.config.top_k_paragraphs) {
                    let lo = idx.saturating_sub(self.config.context_window);
                    let hi = (idx + self.config.context_window).min(paragraphs.len() - 1);
                    selected.extend(lo..=hi);
                }
                selected
            }
            PreprocessMode::Preserve => {
                let ratio = self.config.preserve_ratio.clamp(0.1, 1.0);
                let keep = ((paragraphs.len() as f64 * ratio).floor() as usize).max(1);
                top_k_indices(&scores, keep).into_iter().collect()
            }
        };

        let processed_text = selected
            .iter()
            .map(|&i| paragraphs[i].as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let processed_len = processed_text.chars().count();
        let compression_ratio = if original_len > 0 {
            processed_len as f64 / original_len as f64
        } else {
            0.0
        };

        debug!(
            subsystem = "ingest",
            component = "preprocess",
            paragraphs_in = paragraphs.len(),
            paragraphs_out = selected.len(),
            compression = compression_ratio,
            "Preprocessing complete"
        );

        ProcessedText {
            processed_text,
            method: self.config.mode.as_str().to_string(),
            algorithm: self.config.algorithm.as_str().to_string(),
            compression_ratio,
            paragraph_count: selected.len(),
        }
    }
}

/// Split text into non-empty trimmed paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .flat_map(|block| block.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// CJK character share above which the CJK splitter takes over.
const CJK_RATIO_THRESHOLD: f64 = 0.2;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

/// Whether a text is predominantly CJK.
pub fn is_cjk_text(text: &str) -> bool {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return false;
    }
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    cjk as f64 / total as f64 > CJK_RATIO_THRESHOLD
}

/// Script-aware sentence splitting.
pub fn split_sentences(text: &str) -> Vec<String> {
    if is_cjk_text(text) {
        split_sentences_cjk(text)
    } else {
        split_sentences_latin(text)
    }
}

fn split_sentences_cjk(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '。' | '！' | '？' | '；' | '\n') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

fn split_sentences_latin(text: &str) -> Vec<String> {
    // Terminators followed by whitespace/EOF; common abbreviations and
    // decimals are not boundaries.
    let sentence_regex = Regex::new(r"[.!?]+(?:\s+|$)").expect("static regex");
    let abbrev_regex =
        Regex::new(r"(?i)\b(?:dr|mr|mrs|ms|prof|sr|jr|inc|ltd|co|etc|vs|e\.g|i\.e)\.$")
            .expect("static regex");

    let mut sentences = Vec::new();
    let mut last_end = 0;

    for mat in sentence_regex.find_iter(text) {
        let end = mat.end();
        let candidate = &text[last_end..end];

        if abbrev_regex.is_match(candidate.trim()) {
            continue;
        }

        let before_punct = mat.start();
        if before_punct > 0
            && text[..before_punct]
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_digit())
            && text[mat.start()..end].starts_with('.')
        {
            continue;
        }

        let trimmed = candidate.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
        last_end = end;
    }

    if last_end < text.len() {
        let tail = text[last_end..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }

    sentences
}

fn tokenize(sentence: &str) -> Vec<String> {
    if is_cjk_text(sentence) {
        sentence
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
            .map(|c| c.to_string())
            .collect()
    } else {
        sentence
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| c.is_ascii_punctuation())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }
}

/// Rank sentences over a similarity graph and return the top `n` by rank.
pub fn rank_sentences(sentences: &[String], algorithm: RankAlgorithm, n: usize) -> Vec<String> {
    if sentences.is_empty() || n == 0 {
        return vec![];
    }
    if sentences.len() <= n {
        return sentences.to_vec();
    }

    let token_sets: Vec<Vec<String>> = sentences.iter().map(|s| tokenize(s)).collect();
    let count = sentences.len();

    // Row-normalized similarity matrix
    let mut matrix = vec![vec![0.0f64; count]; count];
    for i in 0..count {
        for j in (i + 1)..count {
            let sim = match algorithm {
                RankAlgorithm::TextRank => overlap_similarity(&token_sets[i], &token_sets[j]),
                RankAlgorithm::LexRank => cosine_similarity(&token_sets[i], &token_sets[j]),
            };
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }

    let mut ranks = vec![1.0 / count as f64; count];
    for _ in 0..RANK_ITERATIONS {
        let mut next = vec![(1.0 - DAMPING) / count as f64; count];
        for i in 0..count {
            let row_sum: f64 = matrix[i].iter().sum();
            if row_sum == 0.0 {
                continue;
            }
            for j in 0..count {
                if matrix[i][j] > 0.0 {
                    next[j] += DAMPING * ranks[i] * matrix[i][j] / row_sum;
                }
            }
        }

        let delta: f64 = ranks
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        ranks = next;
        if delta < RANK_TOLERANCE {
            break;
        }
    }

    let mut indexed: Vec<(usize, f64)> = ranks.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut top: Vec<usize> = indexed.into_iter().take(n).map(|(i, _)| i).collect();
    // Key sentences in document order read better in prompts.
    top.sort_unstable();
    top.into_iter().map(|i| sentences[i].clone()).collect()
}

/// TextRank similarity: shared words normalized by log lengths.
fn overlap_similarity(a: &[String], b: &[String]) -> f64 {
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }
    let set_a: HashSet<&String> = a.iter().collect();
    let shared = b.iter().filter(|w| set_a.contains(w)).count();
    if shared == 0 {
        return 0.0;
    }
    shared as f64 / ((a.len() as f64).ln() + (b.len() as f64).ln())
}

/// LexRank similarity: cosine over term frequencies.
fn cosine_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut freq_a: HashMap<&String, f64> = HashMap::new();
    for w in a {
        *freq_a.entry(w).or_default() += 1.0;
    }
    let mut freq_b: HashMap<&String, f64> = HashMap::new();
    for w in b {
        *freq_b.entry(w).or_default() += 1.0;
    }

    let dot: f64 = freq_a
        .iter()
        .filter_map(|(w, fa)| freq_b.get(w).map(|fb| fa * fb))
        .sum();
    let norm_a: f64 = freq_a.values().map(|f| f * f).sum::<f64>().sqrt();
    let norm_b: f64 = freq_b.values().map(|f| f * f).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Paragraph score: +1 per key sentence contained verbatim, +0.5 per key
/// sentence with word overlap ≥ 0.6.
pub fn score_paragraphs(paragraphs: &[String], key_sentences: &[String]) -> Vec<f64> {
    let mut scores = vec![0.0f64; paragraphs.len()];
    let paragraph_tokens: Vec<HashSet<String>> = paragraphs
        .iter()
        .map(|p| tokenize(p).into_iter().collect())
        .collect();

    for sentence in key_sentences {
        let sentence_tokens = tokenize(sentence);
        for (idx, paragraph) in paragraphs.iter().enumerate() {
            if paragraph.contains(sentence.as_str()) {
                scores[idx] += 1.0;
            } else if !sentence_tokens.is_empty() {
                let overlap = sentence_tokens
                    .iter()
                    .filter(|w| paragraph_tokens[idx].contains(*w))
                    .count();
                if overlap as f64 / sentence_tokens.len() as f64 >= PARTIAL_OVERLAP_RATIO {
                    scores[idx] += 0.5;
                }
            }
        }
    }

    scores
}

/// Indices of the `k` highest-scoring paragraphs (ties to earlier ones).
fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indexed: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    indexed.into_iter().take(k).map(|(i, _)| i).collect()
}
