//! Ingestion orchestrator.
//!
//! The synchronous half validates and persists a skeleton insight; the
//! asynchronous half (one supervised task per insight, bounded by a
//! semaphore and a hard deadline) runs fetch → extract → preprocess →
//! summarize → chunk → embed → persist. Every stage may degrade without
//! failing the insight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use mnema_core::{
    defaults, ChunkRepository, ContentRepository, CreateInsightRequest, EmbeddingBackend, Error,
    GenerationBackend, Insight, InsightChunk, InsightContent, InsightWithTags,
    IngestionDegradation, IngestionReport, InsightRepository, MetadataPreview, Result,
    TagRepository,
};
use mnema_db::Database;

use crate::chunker::RecursiveChunker;
use crate::extractor::{ExtractedArticle, Extractor};
use crate::fetcher::Fetcher;
use crate::preprocess::Preprocessor;
use crate::summarize::Summarizer;
use crate::summary_cache::{Begin, SummaryCache, SummaryStatus};

/// How long an ingest waits on another task's in-flight summary before
/// generating its own.
const SUMMARY_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Hard deadline for one pipeline run.
    pub deadline: Duration,
    /// Concurrent pipeline runs per process.
    pub max_concurrent: usize,
    /// Whether page content is fetched at all (`FETCH_PAGE_CONTENT_ENABLED`).
    pub fetch_enabled: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(defaults::INGEST_DEADLINE_SECS),
            max_concurrent: defaults::INGEST_MAX_CONCURRENT,
            fetch_enabled: true,
        }
    }
}

impl IngestConfig {
    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fetch_enabled: std::env::var("FETCH_PAGE_CONTENT_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.fetch_enabled),
            max_concurrent: std::env::var("INGEST_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent),
            ..defaults
        }
    }
}

/// Ingestion orchestrator. Cloning shares the summary cache and the
/// concurrency permits; one logical instance per process.
#[derive(Clone)]
pub struct IngestionPipeline {
    db: Database,
    embedder: Arc<dyn EmbeddingBackend>,
    summarizer: Summarizer,
    summary_cache: Arc<SummaryCache>,
    fetcher: Fetcher,
    extractor: Extractor,
    preprocessor: Preprocessor,
    chunker: RecursiveChunker,
    config: IngestConfig,
    permits: Arc<Semaphore>,
}

impl IngestionPipeline {
    pub fn new(
        db: Database,
        embedder: Arc<dyn EmbeddingBackend>,
        generator: Arc<dyn GenerationBackend>,
        summary_cache: Arc<SummaryCache>,
        config: IngestConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            db,
            embedder,
            summarizer: Summarizer::new(generator, crate::summarize::SummarizerConfig::from_env()),
            summary_cache,
            fetcher: Fetcher::with_defaults(),
            extractor: Extractor::with_defaults(),
            preprocessor: Preprocessor::with_defaults(),
            chunker: RecursiveChunker::with_defaults(),
            config,
            permits,
        }
    }

    /// Shared summary cache (also consulted by the metadata endpoints).
    pub fn summary_cache(&self) -> &Arc<SummaryCache> {
        &self.summary_cache
    }

    // =========================================================================
    // SYNCHRONOUS ENTRYPOINT
    // =========================================================================

    /// Validate and persist the skeleton insight. Returns the stored row;
    /// the caller is expected to follow up with [`Self::spawn_ingest`].
    pub async fn create_insight(
        &self,
        user_id: Uuid,
        req: &CreateInsightRequest,
    ) -> Result<InsightWithTags> {
        let url = req.url.trim();
        if url.is_empty() {
            return Err(Error::Validation("url must not be empty".to_string()));
        }
        if url.chars().count() > defaults::URL_MAX_CHARS {
            return Err(Error::Validation(format!(
                "url exceeds {} characters",
                defaults::URL_MAX_CHARS
            )));
        }
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Validation(format!("invalid url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation("url scheme must be http(s)".to_string()));
        }
        if let Some(ref thought) = req.thought {
            if thought.chars().count() > defaults::THOUGHT_MAX_CHARS {
                return Err(Error::Validation(format!(
                    "thought exceeds {} characters",
                    defaults::THOUGHT_MAX_CHARS
                )));
            }
        }

        let insight = Insight {
            id: Uuid::nil(),
            user_id,
            url: url.to_string(),
            title: req.title.clone(),
            description: req.description.clone(),
            image_url: req.image_url.clone(),
            thought: req.thought.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = self.db.insights.insert(&insight).await?;

        if let Some(ref tag_ids) = req.tag_ids {
            self.db.tags.attach(id, user_id, tag_ids).await?;
        }

        let insight = self
            .db
            .insights
            .get(id)
            .await?
            .ok_or(Error::InsightNotFound(id))?;
        let tags = self.db.tags.tags_for_insight(id).await?;

        info!(
            subsystem = "ingest",
            op = "create",
            insight_id = %id,
            user_id = %user_id,
            "Insight created"
        );

        Ok(InsightWithTags { insight, tags })
    }

    /// Spawn the supervised background run for an insight. The task takes
    /// a concurrency permit and is bounded by the pipeline deadline; a
    /// deadline hit keeps whatever partial state already persisted.
    pub fn spawn_ingest(&self, insight_id: Uuid) -> tokio::task::JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let _permit = match pipeline.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match tokio::time::timeout(pipeline.config.deadline, pipeline.run(insight_id)).await {
                Ok(Ok(report)) => {
                    if report.is_clean() {
                        info!(
                            subsystem = "ingest",
                            op = "ingest",
                            insight_id = %insight_id,
                            chunk_count = report.chunks_persisted,
                            "Ingestion complete"
                        );
                    } else {
                        warn!(
                            subsystem = "ingest",
                            op = "ingest",
                            insight_id = %insight_id,
                            chunk_count = report.chunks_persisted,
                            degradations = ?report.degradations,
                            "Partial ingest"
                        );
                    }
                }
                Ok(Err(e)) => {
                    warn!(
                        subsystem = "ingest",
                        op = "ingest",
                        insight_id = %insight_id,
                        error = %e,
                        "Ingestion failed"
                    );
                }
                Err(_) => {
                    warn!(
                        subsystem = "ingest",
                        op = "ingest",
                        insight_id = %insight_id,
                        deadline_secs = pipeline.config.deadline.as_secs(),
                        "Ingestion deadline exceeded, partial state kept"
                    );
                }
            }
        })
    }

    // =========================================================================
    // ASYNC PIPELINE
    // =========================================================================

    /// Run the full pipeline for one insight. Re-running is idempotent:
    /// contents upsert and chunks are replaced wholesale.
    pub async fn run(&self, insight_id: Uuid) -> Result<IngestionReport> {
        let insight = self
            .db
            .insights
            .get(insight_id)
            .await?
            .ok_or(Error::InsightNotFound(insight_id))?;

        let mut report = IngestionReport {
            insight_id,
            chunks_persisted: 0,
            chunks_embedded: 0,
            summary_cached: false,
            degradations: Vec::new(),
        };

        // 1. Fetch
        let page = if self.config.fetch_enabled {
            match self.fetcher.fetch(&insight.url).await {
                Ok(page) => Some(page),
                Err(e) => {
                    report
                        .degradations
                        .push(IngestionDegradation::FetchFailed(e.to_string()));
                    None
                }
            }
        } else {
            None
        };

        let Some(page) = page else {
            // Insight stays usable with user-provided fields only.
            return Ok(report);
        };

        // 2. Extract (never throws; empty body is a degradation)
        let article = self.extractor.extract(&page.html, &insight.url);
        if article.text.trim().is_empty() {
            report.degradations.push(IngestionDegradation::ExtractionEmpty);
            self.apply_metadata(&insight, &article).await?;
            return Ok(report);
        }

        // 3. Preprocess + summary (cache-aware)
        let processed = self.preprocessor.process(&article.text);
        let (summary, from_cache) = self.obtain_summary(&insight.url, &processed.processed_text).await;
        report.summary_cached = from_cache;
        if summary.is_none() {
            report
                .degradations
                .push(IngestionDegradation::SummaryFailed(
                    "summary generation failed".to_string(),
                ));
        }

        // 4. Persist contents (upsert keyed by insight_id)
        let content = InsightContent {
            insight_id,
            user_id: insight.user_id,
            url: insight.url.clone(),
            html: None,
            text: Some(processed.processed_text.clone()),
            markdown: Some(article.markdown.clone()),
            summary: summary.clone(),
            thought: insight.thought.clone(),
            content_type: Some(page.content_type.clone()),
            extracted_at: Some(Utc::now()),
        };
        self.db.contents.upsert(&content).await?;

        // 5. Chunk
        let pieces = self.chunker.chunk(&processed.processed_text);

        // 6. Embed + persist in batches
        self.db.chunks.delete_for_insight(insight_id).await?;
        let (persisted, embedded) = self.embed_and_persist(insight_id, &pieces).await?;
        report.chunks_persisted = persisted;
        report.chunks_embedded = embedded;
        if embedded < persisted {
            report
                .degradations
                .push(IngestionDegradation::EmbeddingPartial {
                    failed_chunks: persisted - embedded,
                });
        }

        // 7. Final metadata
        self.apply_metadata(&insight, &article).await?;

        Ok(report)
    }

    /// Summary via the per-URL cache: reuse, await an in-flight task, or
    /// generate and record. Returns `(summary, was_cache_hit)`.
    async fn obtain_summary(&self, url: &str, processed_text: &str) -> (Option<String>, bool) {
        match self.summary_cache.begin(url) {
            Begin::Cached(summary) => (Some(summary), true),
            Begin::InFlight => {
                match self.summary_cache.wait_for(url, SUMMARY_WAIT_TIMEOUT).await {
                    Some(SummaryStatus::Completed { summary }) => (Some(summary), true),
                    // Timed out or the other task failed: generate locally
                    // without touching the cache entry.
                    _ => (self.generate_summary_uncached(processed_text).await, false),
                }
            }
            Begin::Started => match self.summarizer.summarize(processed_text).await {
                Ok(summary) => {
                    self.summary_cache.complete(url, summary.clone());
                    (Some(summary), false)
                }
                Err(e) => {
                    self.summary_cache.fail(url, e.to_string());
                    (None, false)
                }
            },
        }
    }

    async fn generate_summary_uncached(&self, processed_text: &str) -> Option<String> {
        match self.summarizer.summarize(processed_text).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(
                    subsystem = "ingest",
                    component = "summarizer",
                    error = %e,
                    "Uncached summary generation failed"
                );
                None
            }
        }
    }

    /// Embed chunk batches, persisting each as it completes. Failed
    /// batches are retried once; chunks still failing persist with a null
    /// embedding (invisible to retrieval until the next ingest).
    async fn embed_and_persist(
        &self,
        insight_id: Uuid,
        pieces: &[crate::chunker::ChunkPiece],
    ) -> Result<(usize, usize)> {
        let mut persisted = 0;
        let mut embedded = 0;

        for batch in pieces.chunks(defaults::EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|p| p.chunk_text.clone()).collect();

            let mut vectors = self.embedder.embed_texts(&texts).await;
            if vectors.is_err() {
                vectors = self.embedder.embed_texts(&texts).await;
            }

            let rows: Vec<InsightChunk> = match vectors {
                Ok(vectors) => {
                    embedded += batch.len();
                    batch
                        .iter()
                        .zip(vectors.into_iter())
                        .map(|(piece, vector)| self.chunk_row(insight_id, piece, Some(vector)))
                        .collect()
                }
                Err(e) => {
                    warn!(
                        subsystem = "ingest",
                        component = "embedding",
                        insight_id = %insight_id,
                        chunk_count = batch.len(),
                        error = %e,
                        "Embedding batch failed twice, persisting without vectors"
                    );
                    batch
                        .iter()
                        .map(|piece| self.chunk_row(insight_id, piece, None))
                        .collect()
                }
            };

            self.db.chunks.insert_batch(&rows).await?;
            persisted += rows.len();
        }

        Ok((persisted, embedded))
    }

    fn chunk_row(
        &self,
        insight_id: Uuid,
        piece: &crate::chunker::ChunkPiece,
        embedding: Option<pgvector::Vector>,
    ) -> InsightChunk {
        let has_embedding = embedding.is_some();
        InsightChunk {
            id: Uuid::nil(),
            insight_id,
            chunk_index: piece.chunk_index,
            chunk_text: piece.chunk_text.clone(),
            chunk_size: piece.chunk_size,
            estimated_tokens: piece.estimated_tokens,
            chunk_method: self.chunker.method().to_string(),
            chunk_overlap: self.chunker.config().chunk_overlap as i32,
            embedding,
            embedding_model: has_embedding.then(|| self.embedder.model_name().to_string()),
            embedding_tokens: has_embedding.then_some(piece.estimated_tokens),
            embedding_generated_at: has_embedding.then(Utc::now),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Extracted metadata fills only the fields the user left empty.
    async fn apply_metadata(&self, insight: &Insight, article: &ExtractedArticle) -> Result<()> {
        let title = (!article.title.is_empty()).then_some(article.title.as_str());
        let description = (!article.description.is_empty()).then_some(article.description.as_str());
        let image_url = (!article.image_url.is_empty()).then_some(article.image_url.as_str());

        self.db
            .insights
            .update_extracted_metadata(insight.id, title, description, image_url)
            .await
    }

    // =========================================================================
    // METADATA PREVIEW / CACHE WARMING
    // =========================================================================

    /// Synchronous fetch+extract for the metadata-preview endpoint. Also
    /// spawns the background summary task that warms the cache for a later
    /// full ingest of the same URL.
    pub async fn preview_metadata(&self, url: &str) -> Result<MetadataPreview> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Validation(format!("invalid url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation("url scheme must be http(s)".to_string()));
        }

        let page = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let article = self.extractor.extract(&page.html, url);

        self.spawn_summary_warming(url.to_string(), article.text.clone());

        Ok(MetadataPreview {
            url: url.to_string(),
            title: (!article.title.is_empty()).then(|| article.title.clone()),
            description: (!article.description.is_empty()).then(|| article.description.clone()),
            image_url: (!article.image_url.is_empty()).then(|| article.image_url.clone()),
        })
    }

    /// Background cache-warming task: preprocess + summarize into the
    /// per-URL cache. Coalesced by the cache's `begin` CAS.
    fn spawn_summary_warming(&self, url: String, body: String) {
        if body.trim().is_empty() {
            return;
        }
        let pipeline = self.clone();
        tokio::spawn(async move {
            if !matches!(pipeline.summary_cache.begin(&url), Begin::Started) {
                return;
            }
            let processed = pipeline.preprocessor.process(&body);
            match pipeline.summarizer.summarize(&processed.processed_text).await {
                Ok(summary) => pipeline.summary_cache.complete(&url, summary),
                Err(e) => pipeline.summary_cache.fail(&url, e.to_string()),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_config_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.deadline, Duration::from_secs(300));
        assert_eq!(config.max_concurrent, 4);
        assert!(config.fetch_enabled);
    }
}
