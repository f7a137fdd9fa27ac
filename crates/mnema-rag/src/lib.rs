//! # mnema-rag
//!
//! Vector retrieval and RAG context assembly: query embedding, cosine
//! search over the caller's chunks, and citation-indexed context blocks.

pub mod context;
pub mod retriever;

pub use context::{build_context, ContextConfig};
pub use retriever::{RetrievalParams, Retriever};
