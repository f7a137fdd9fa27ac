//! Email repository: digest audit, preferences, events, suppressions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::RngCore;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use mnema_core::{
    new_v7, DigestCandidate, EmailDigest, EmailPreferences, Error, Result,
    UpdateEmailPreferences,
};

/// PostgreSQL implementation of `EmailRepository`.
#[derive(Clone)]
pub struct PgEmailRepository {
    pool: Pool<Postgres>,
}

impl PgEmailRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_preferences(row: &sqlx::postgres::PgRow) -> EmailPreferences {
        EmailPreferences {
            user_id: row.get("user_id"),
            weekly_digest_enabled: row.get("weekly_digest_enabled"),
            preferred_day: row.get("preferred_day"),
            preferred_hour: row.get("preferred_hour"),
            timezone: row.get("timezone"),
            no_activity_policy: row.get("no_activity_policy"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_digest(row: &sqlx::postgres::PgRow) -> EmailDigest {
        EmailDigest {
            id: row.get("id"),
            user_id: row.get("user_id"),
            week_start: row.get("week_start"),
            status: row.get("status"),
            payload: row.get("payload"),
            message_id: row.get("message_id"),
            error: row.get("error"),
            retry_count: row.get("retry_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn new_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl mnema_core::EmailRepository for PgEmailRepository {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<EmailPreferences>> {
        let row = sqlx::query("SELECT * FROM email_preferences WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::row_to_preferences))
    }

    async fn upsert_preferences(
        &self,
        user_id: Uuid,
        update: &UpdateEmailPreferences,
    ) -> Result<EmailPreferences> {
        if let Some(day) = update.preferred_day {
            if !(0..=6).contains(&day) {
                return Err(Error::Validation("preferred_day must be 0..=6".to_string()));
            }
        }
        if let Some(hour) = update.preferred_hour {
            if !(0..=23).contains(&hour) {
                return Err(Error::Validation(
                    "preferred_hour must be 0..=23".to_string(),
                ));
            }
        }

        let row = sqlx::query(
            "INSERT INTO email_preferences
                 (user_id, weekly_digest_enabled, preferred_day, preferred_hour, timezone,
                  no_activity_policy, created_at, updated_at)
             VALUES ($1,
                     COALESCE($2, true),
                     COALESCE($3, 6::smallint),
                     COALESCE($4, 20::smallint),
                     COALESCE($5, 'America/Los_Angeles'),
                     COALESCE($6, 'skip'),
                     now(), now())
             ON CONFLICT (user_id) DO UPDATE SET
                 weekly_digest_enabled = COALESCE($2, email_preferences.weekly_digest_enabled),
                 preferred_day = COALESCE($3, email_preferences.preferred_day),
                 preferred_hour = COALESCE($4, email_preferences.preferred_hour),
                 timezone = COALESCE($5, email_preferences.timezone),
                 no_activity_policy = COALESCE($6, email_preferences.no_activity_policy),
                 updated_at = now()
             RETURNING *",
        )
        .bind(user_id)
        .bind(update.weekly_digest_enabled)
        .bind(update.preferred_day)
        .bind(update.preferred_hour)
        .bind(&update.timezone)
        .bind(update.no_activity_policy)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::row_to_preferences(&row))
    }

    async fn digest_candidates(&self) -> Result<Vec<DigestCandidate>> {
        let rows = sqlx::query(
            "SELECT p.user_id, pr.email, pr.nickname, p.*,
                    EXISTS (SELECT 1 FROM insights i WHERE i.user_id = p.user_id) AS has_insights
             FROM email_preferences p
             JOIN profiles pr ON pr.id = p.user_id
             WHERE pr.email IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| DigestCandidate {
                user_id: row.get("user_id"),
                email: row.get("email"),
                nickname: row.get("nickname"),
                preferences: Self::row_to_preferences(row),
                has_insights: row.get("has_insights"),
            })
            .collect())
    }

    async fn begin_digest(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<(EmailDigest, bool)> {
        // CAS: the unique (user_id, week_start) index arbitrates concurrent
        // sweeps; the loser reads back the winner's row.
        let inserted = sqlx::query(
            "INSERT INTO email_digests
                 (id, user_id, week_start, status, retry_count, created_at, updated_at)
             VALUES ($1, $2, $3, 'queued', 0, now(), now())
             ON CONFLICT (user_id, week_start) DO NOTHING
             RETURNING *",
        )
        .bind(new_v7())
        .bind(user_id)
        .bind(week_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(row) = inserted {
            return Ok((Self::row_to_digest(&row), true));
        }

        let row = sqlx::query(
            "SELECT * FROM email_digests WHERE user_id = $1 AND week_start = $2",
        )
        .bind(user_id)
        .bind(week_start)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok((Self::row_to_digest(&row), false))
    }

    async fn get_digest(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<Option<EmailDigest>> {
        let row = sqlx::query(
            "SELECT * FROM email_digests WHERE user_id = $1 AND week_start = $2",
        )
        .bind(user_id)
        .bind(week_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::row_to_digest))
    }

    async fn mark_digest_sent(
        &self,
        id: Uuid,
        message_id: &str,
        payload: &JsonValue,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE email_digests
             SET status = 'sent', message_id = $2, payload = $3, error = NULL, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(message_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_digest_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE email_digests
             SET status = 'failed', error = $2, retry_count = retry_count + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn requeue_digest(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE email_digests SET status = 'queued', updated_at = now()
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn record_event(
        &self,
        message_id: &str,
        event: &str,
        email: Option<&str>,
        payload: &JsonValue,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_events (id, message_id, event, email, payload, occurred_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(new_v7())
        .bind(message_id)
        .bind(event)
        .bind(email)
        .bind(payload)
        .bind(occurred_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn add_suppression(&self, email: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO email_suppressions (id, email, reason, created_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(new_v7())
        .bind(email)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn is_suppressed(&self, email: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM email_suppressions WHERE email = $1) AS suppressed",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.get("suppressed"))
    }

    async fn get_or_create_unsubscribe_token(&self, user_id: Uuid) -> Result<String> {
        if let Some(row) = sqlx::query("SELECT token FROM unsubscribe_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
        {
            return Ok(row.get("token"));
        }

        let token = Self::new_token();
        // A concurrent insert for the same user wins by unique constraint;
        // read back whichever token landed.
        sqlx::query(
            "INSERT INTO unsubscribe_tokens (token, user_id, created_at)
             VALUES ($1, $2, now())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(&token)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query("SELECT token FROM unsubscribe_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.get("token"))
    }

    async fn resolve_unsubscribe_token(&self, token: &str) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT user_id FROM unsubscribe_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|r| r.get("user_id")))
    }

    async fn disable_digest(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE email_preferences SET weekly_digest_enabled = false, updated_at = now()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn digest_history(&self, user_id: Uuid, limit: i64) -> Result<Vec<EmailDigest>> {
        let rows = sqlx::query(
            "SELECT * FROM email_digests WHERE user_id = $1
             ORDER BY week_start DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::row_to_digest).collect())
    }
}
