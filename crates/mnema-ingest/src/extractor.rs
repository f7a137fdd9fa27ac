//! Article extraction: boilerplate-stripped body text plus metadata.
//!
//! Layered strategy: metadata comes from OpenGraph/meta tags with
//! fallbacks, the body from the densest text block under `<article>`,
//! `<main>`, or similar landmarks. Extraction never fails — a page with
//! nothing extractable yields empty fields and the orchestrator carries on
//! with user-supplied data.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;

/// Per-domain extraction tuning.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Prefer tighter boilerplate rejection over body completeness.
    pub favor_precision: bool,
    /// Prefer body completeness over boilerplate rejection.
    pub favor_recall: bool,
    pub include_tables: bool,
    pub include_comments: bool,
    /// Drop repeated paragraphs (nav fragments duplicated in footers).
    pub deduplicate: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            favor_precision: true,
            favor_recall: false,
            include_tables: true,
            include_comments: false,
            deduplicate: true,
        }
    }
}

/// Result of one extraction pass. All fields may be empty.
#[derive(Debug, Clone, Default)]
pub struct ExtractedArticle {
    pub title: String,
    pub description: String,
    pub image_url: String,
    /// Boilerplate-stripped body text, paragraphs joined by blank lines.
    pub text: String,
    /// Lightweight markdown rendering of the body (headings preserved).
    pub markdown: String,
}

/// Minimum paragraph length retained in precision mode.
const MIN_PARAGRAPH_CHARS_PRECISION: usize = 40;

/// Minimum paragraph length retained in recall mode.
const MIN_PARAGRAPH_CHARS_RECALL: usize = 15;

/// Description fallback length when derived from the first paragraph.
const DESCRIPTION_FALLBACK_CHARS: usize = 240;

/// Article extractor.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ExtractorConfig::default())
    }

    /// Extract article text and metadata from HTML.
    pub fn extract(&self, html: &str, url: &str) -> ExtractedArticle {
        let document = Html::parse_document(html);

        let title = self
            .meta_content(&document, "meta[property=\"og:title\"]")
            .or_else(|| self.first_text(&document, "title"))
            .or_else(|| self.first_text(&document, "h1"))
            .unwrap_or_else(|| title_from_url(url));

        let image_url = self
            .meta_content(&document, "meta[property=\"og:image\"]")
            .unwrap_or_default();

        let (text, markdown) = self.extract_body(&document);

        let description = self
            .meta_content(&document, "meta[property=\"og:description\"]")
            .or_else(|| self.meta_content(&document, "meta[name=\"description\"]"))
            .unwrap_or_else(|| first_paragraph_snippet(&text));

        debug!(
            subsystem = "ingest",
            component = "extractor",
            url = %url,
            body_chars = text.len(),
            has_title = !title.is_empty(),
            "Extraction complete"
        );

        ExtractedArticle {
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            image_url,
            text,
            markdown,
        }
    }

    fn meta_content(&self, document: &Html, selector: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn first_text(&self, document: &Html, selector: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .next()
            .map(|el| collect_text(&el))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Pick the landmark with the densest text, then walk its paragraphs.
    fn extract_body(&self, document: &Html) -> (String, String) {
        let landmarks = [
            "article",
            "main",
            "[role=\"main\"]",
            "#content",
            ".post-content",
            ".article-content",
            "body",
        ];

        let mut best: Option<(ElementRef, usize)> = None;
        for landmark in landmarks {
            let Ok(selector) = Selector::parse(landmark) else {
                continue;
            };
            for element in document.select(&selector) {
                let density = paragraph_density(&element);
                if best.map(|(_, d)| density > d).unwrap_or(true) {
                    best = Some((element, density));
                }
            }
            // The first landmark kind that yields real content wins; later
            // entries are progressively noisier fallbacks.
            if best.map(|(_, d)| d > 0).unwrap_or(false) {
                break;
            }
        }

        let Some((root, _)) = best else {
            return (String::new(), String::new());
        };

        let min_chars = if self.config.favor_recall {
            MIN_PARAGRAPH_CHARS_RECALL
        } else {
            MIN_PARAGRAPH_CHARS_PRECISION
        };

        let mut blocks: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let block_selector = Selector::parse("p, h1, h2, h3, h4, li, td, blockquote, pre")
            .expect("static selector");
        for element in root.select(&block_selector) {
            let tag = element.value().name();

            if !self.config.include_tables && tag == "td" {
                continue;
            }
            if !self.config.include_comments && in_comment_section(&element) {
                continue;
            }

            let content = collect_text(&element);
            let content = content.trim();
            if content.is_empty() {
                continue;
            }

            let is_heading = tag.starts_with('h');
            if !is_heading && content.chars().count() < min_chars {
                continue;
            }

            if self.config.deduplicate {
                let key = content.to_string();
                if !seen.insert(key) {
                    continue;
                }
            }

            let md = match tag {
                "h1" => format!("# {}", content),
                "h2" => format!("## {}", content),
                "h3" => format!("### {}", content),
                "h4" => format!("#### {}", content),
                "li" => format!("- {}", content),
                "blockquote" => format!("> {}", content),
                "pre" => format!("```\n{}\n```", content),
                _ => content.to_string(),
            };

            blocks.push((content.to_string(), md));
        }

        let text = blocks
            .iter()
            .filter(|(c, _)| !c.is_empty())
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let markdown = blocks
            .iter()
            .map(|(_, m)| m.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        (text, markdown)
    }
}

/// Concatenated text of an element's descendants.
fn collect_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count of characters inside `<p>` descendants — the density signal used
/// to rank candidate landmarks.
fn paragraph_density(element: &ElementRef) -> usize {
    let selector = Selector::parse("p").expect("static selector");
    element
        .select(&selector)
        .map(|p| collect_text(&p).chars().count())
        .sum()
}

/// Whether an element sits under an obvious comment container.
fn in_comment_section(element: &ElementRef) -> bool {
    let mut current = element.parent();
    while let Some(node) = current {
        if let Some(el) = node.value().as_element() {
            let id = el.attr("id").unwrap_or("");
            let class = el.attr("class").unwrap_or("");
            if id.contains("comment") || class.contains("comment") {
                return true;
            }
        }
        current = node.parent();
    }
    false
}

/// Derive a title from the URL path when the page offers none.
fn title_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(String::from))
                .or_else(|| u.host_str().map(String::from))
        })
        .map(|s| s.replace(['-', '_'], " "))
        .unwrap_or_default()
}

/// First ~240 chars of the body, cut at a char boundary.
fn first_paragraph_snippet(text: &str) -> String {
    let first = text.split("\n\n").next().unwrap_or("");
    first.chars().take(DESCRIPTION_FALLBACK_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_HTML: &str = r#"<!doctype html>
        <html><head>
            <title>Fallback Title</title>
            <meta property="og:title" content="Attention Is All You Need">
            <meta property="og:description" content="The transformer paper.">
            <meta property="og:image" content="https://example.com/fig1.png">
        </head><body>
            <nav><p>Home About Contact</p></nav>
            <article>
                <h1>Attention Is All You Need</h1>
                <p>The dominant sequence transduction models are based on complex recurrent or convolutional neural networks.</p>
                <p>We propose a new simple network architecture, the Transformer, based solely on attention mechanisms.</p>
            </article>
        </body></html>"#;

    #[test]
    fn test_extract_og_metadata() {
        let article = Extractor::with_defaults().extract(ARTICLE_HTML, "https://example.com/a");
        assert_eq!(article.title, "Attention Is All You Need");
        assert_eq!(article.description, "The transformer paper.");
        assert_eq!(article.image_url, "https://example.com/fig1.png");
    }

    #[test]
    fn test_extract_body_from_article_landmark() {
        let article = Extractor::with_defaults().extract(ARTICLE_HTML, "https://example.com/a");
        assert!(article.text.contains("sequence transduction"));
        assert!(article.text.contains("attention mechanisms"));
        // nav boilerplate is below the length threshold
        assert!(!article.text.contains("Home About Contact"));
    }

    #[test]
    fn test_markdown_preserves_headings() {
        let article = Extractor::with_defaults().extract(ARTICLE_HTML, "https://example.com/a");
        assert!(article.markdown.contains("# Attention Is All You Need"));
    }

    #[test]
    fn test_title_falls_back_to_title_tag() {
        let html = "<html><head><title>Plain Title</title></head><body><p>text</p></body></html>";
        let article = Extractor::with_defaults().extract(html, "https://example.com/a");
        assert_eq!(article.title, "Plain Title");
    }

    #[test]
    fn test_title_falls_back_to_url_path() {
        let article =
            Extractor::with_defaults().extract("<html></html>", "https://example.com/neural-networks-intro");
        assert_eq!(article.title, "neural networks intro");
    }

    #[test]
    fn test_description_falls_back_to_first_paragraph() {
        let html = format!(
            "<html><body><article><p>{}</p></article></body></html>",
            "A sufficiently long opening paragraph describing what this page is about in detail."
        );
        let article = Extractor::with_defaults().extract(&html, "https://example.com/a");
        assert!(article.description.starts_with("A sufficiently long opening paragraph"));
    }

    #[test]
    fn test_catastrophic_failure_returns_empty() {
        let article = Extractor::with_defaults().extract("", "not a url");
        assert!(article.text.is_empty());
        assert!(article.image_url.is_empty());
    }

    #[test]
    fn test_deduplicate_drops_repeated_paragraphs() {
        let para = "This exact promotional paragraph repeats at the top and bottom of the page.";
        let html = format!(
            "<html><body><article><p>{para}</p><p>Real content paragraph that is long enough to keep around here.</p><p>{para}</p></article></body></html>"
        );
        let article = Extractor::with_defaults().extract(&html, "https://example.com/a");
        assert_eq!(article.text.matches(para).count(), 1);
    }

    #[test]
    fn test_comments_excluded_by_default() {
        let html = r#"<html><body><article>
            <p>Body paragraph with enough characters to clear the retention threshold easily.</p>
            <div class="comments"><p>A commenter opinion that is also long enough to be retained.</p></div>
        </article></body></html>"#;
        let article = Extractor::with_defaults().extract(html, "https://example.com/a");
        assert!(!article.text.contains("commenter opinion"));
    }

    #[test]
    fn test_recall_mode_keeps_short_paragraphs() {
        let html = "<html><body><article><p>Short but real line.</p></article></body></html>";
        let precise = Extractor::with_defaults().extract(html, "https://example.com/a");
        let recall = Extractor::new(ExtractorConfig {
            favor_precision: false,
            favor_recall: true,
            ..ExtractorConfig::default()
        })
        .extract(html, "https://example.com/a");
        assert!(precise.text.is_empty());
        assert!(recall.text.contains("Short but real line."));
    }
}
