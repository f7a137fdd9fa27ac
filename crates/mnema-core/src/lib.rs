//! # mnema-core
//!
//! Core types, traits, and abstractions for the mnema knowledge service.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the other mnema crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use tokenizer::{estimate_chunk_tokens, estimate_tokens};
pub use traits::*;
pub use uuid_utils::{extract_timestamp_ms, is_v7, new_v7};
