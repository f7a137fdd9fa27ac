//! HTTP handlers, grouped by surface.

pub mod chat;
pub mod email;
pub mod insights;
pub mod memory;
pub mod metadata;
pub mod sessions;
