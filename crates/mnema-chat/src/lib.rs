//! # mnema-chat
//!
//! The conversational engine: session lifecycle, RAG-grounded streaming
//! turns, post-turn memory extraction, and consolidation of memories into
//! the user's profile document.

pub mod consolidate;
pub mod engine;
pub mod memory;
pub mod prompts;

pub use consolidate::{BucketReport, ConsolidateOptions, ConsolidateReport, Consolidator};
pub use engine::{merge_chunks_to_sources, ChatBackend, ChatEngine, PreparedTurn, TurnOutcome};
pub use memory::MemoryExtractor;
