//! # mnema-db
//!
//! PostgreSQL database layer for mnema.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for all core entities
//! - Vector search with pgvector (cosine distance over 1536-dim chunks)
//! - Digest audit persistence with CAS idempotency
//!
//! ## Example
//!
//! ```rust,ignore
//! use mnema_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/mnema").await?;
//!     let summary = db.chunks.summary(insight_id).await?;
//!     println!("{} chunks embedded", summary.chunks_with_embedding);
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod chunks;
pub mod contents;
pub mod email;
pub mod insights;
pub mod memories;
pub mod pool;
pub mod profiles;
pub mod tags;

// Re-export core types
pub use mnema_core::*;

pub use chat::PgChatStore;
pub use chunks::PgChunkRepository;
pub use contents::PgContentRepository;
pub use email::PgEmailRepository;
pub use insights::PgInsightRepository;
pub use memories::PgMemoryRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use profiles::PgProfileRepository;
pub use tags::PgTagRepository;

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Bundled repositories sharing one connection pool.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Insight repository for CRUD and sync queries.
    pub insights: PgInsightRepository,
    /// Extracted-content repository (1:1 with insights).
    pub contents: PgContentRepository,
    /// Chunk repository: persistence and cosine search.
    pub chunks: PgChunkRepository,
    /// Tag attachment and lookup.
    pub tags: PgTagRepository,
    /// Chat sessions, messages, and retrieval traces.
    pub chat: PgChatStore,
    /// Extracted conversation memories.
    pub memories: PgMemoryRepository,
    /// User profiles and the consolidated memory document.
    pub profiles: PgProfileRepository,
    /// Digest audit, preferences, events, suppressions.
    pub email: PgEmailRepository,
}

impl Database {
    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::from_pool(pool))
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Build the repository bundle around an existing pool.
    pub fn from_pool(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            insights: PgInsightRepository::new(pool.clone()),
            contents: PgContentRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            tags: PgTagRepository::new(pool.clone()),
            chat: PgChatStore::new(pool.clone()),
            memories: PgMemoryRepository::new(pool.clone()),
            profiles: PgProfileRepository::new(pool.clone()),
            email: PgEmailRepository::new(pool.clone()),
            pool,
        }
    }

    /// Liveness probe: one round-trip on the pool.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
