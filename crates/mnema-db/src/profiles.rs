//! Profile repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::warn;
use uuid::Uuid;

use mnema_core::{Error, MemoryProfile, Profile, Result};

/// PostgreSQL implementation of `ProfileRepository`.
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: Pool<Postgres>,
}

impl PgProfileRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl mnema_core::ProfileRepository for PgProfileRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let raw: serde_json::Value = row.get("memory_profile");
            // Unknown or older document shapes fall back to an empty
            // profile rather than poisoning every read.
            let memory_profile = serde_json::from_value(raw).unwrap_or_else(|e| {
                warn!(
                    subsystem = "db",
                    component = "profiles",
                    user_id = %user_id,
                    error = %e,
                    "Unreadable memory profile document, using empty profile"
                );
                MemoryProfile::default()
            });

            Profile {
                id: row.get("id"),
                username: row.get("username"),
                nickname: row.get("nickname"),
                email: row.get("email"),
                avatar_url: row.get("avatar_url"),
                bio: row.get("bio"),
                memory_profile,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }))
    }

    async fn save_memory_profile(&self, user_id: Uuid, profile: &MemoryProfile) -> Result<()> {
        let document = serde_json::to_value(profile)?;

        sqlx::query(
            "UPDATE profiles SET memory_profile = $2, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }
}
