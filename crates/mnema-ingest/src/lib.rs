//! # mnema-ingest
//!
//! URL ingestion pipeline for mnema: bounded HTML fetch, article
//! extraction, key-content preprocessing, LLM summarization with a
//! per-URL work cache, recursive chunking, and batched embedding — all
//! orchestrated per insight with graceful degradation.

pub mod chunker;
pub mod extractor;
pub mod fetcher;
pub mod pipeline;
pub mod preprocess;
pub mod summarize;
pub mod summary_cache;

pub use chunker::{ChunkPiece, ChunkerConfig, RecursiveChunker, SEPARATORS};
pub use extractor::{ExtractedArticle, Extractor, ExtractorConfig};
pub use fetcher::{FetchError, FetchedPage, Fetcher, FetcherConfig};
pub use pipeline::{IngestConfig, IngestionPipeline};
pub use preprocess::{
    PreprocessConfig, PreprocessMode, Preprocessor, ProcessedText, RankAlgorithm,
};
pub use summarize::{Summarizer, SummarizerConfig};
pub use summary_cache::{Begin, SummaryCache, SummaryStatus};
