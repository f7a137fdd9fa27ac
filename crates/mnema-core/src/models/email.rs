//! Email digest models: preferences, audit rows, events, suppressions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// What the dispatcher does for a user with no activity this week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NoActivityPolicy {
    /// Don't send at all.
    Skip,
    /// Send a brief "quiet week" note.
    Brief,
    /// Send reading suggestions instead.
    Suggestions,
}

/// Per-user digest preferences.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailPreferences {
    pub user_id: Uuid,
    pub weekly_digest_enabled: bool,
    /// 0 = Sunday … 6 = Saturday.
    pub preferred_day: i16,
    /// 0–23, user-local.
    pub preferred_hour: i16,
    /// IANA zone name, e.g. `Asia/Tokyo`.
    pub timezone: String,
    pub no_activity_policy: NoActivityPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a digest audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DigestStatus {
    Queued,
    Sent,
    Failed,
}

/// Audit row keyed by `(user_id, week_start)` — the idempotency anchor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailDigest {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Monday of the digest week (UTC date).
    pub week_start: NaiveDate,
    pub status: DigestStatus,
    pub payload: Option<JsonValue>,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stable per-user unsubscribe token, linked from email bodies.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnsubscribeToken {
    pub token: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One provider webhook event, stored verbatim for analytics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailEvent {
    pub id: Uuid,
    pub message_id: String,
    pub event: String,
    pub email: Option<String>,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A record preventing future email to an address.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailSuppression {
    pub id: Uuid,
    pub email: String,
    /// "bounce", "complaint", or "unsubscribe".
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user outcome inside a cron sweep response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestDecision {
    pub user_id: Uuid,
    pub decision: bool,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one cron sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestSweepResult {
    pub processed: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub decisions: Vec<DigestDecision>,
}

/// Request body for `POST /api/v1/email/digest/test-send`.
#[derive(Debug, Clone, Deserialize)]
pub struct TestSendRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub email_override: Option<String>,
}

/// Body for `PUT /api/v1/email/preferences`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEmailPreferences {
    pub weekly_digest_enabled: Option<bool>,
    pub preferred_day: Option<i16>,
    pub preferred_hour: Option<i16>,
    pub timezone: Option<String>,
    pub no_activity_policy: Option<NoActivityPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_activity_policy_wire_format() {
        assert_eq!(
            serde_json::to_string(&NoActivityPolicy::Skip).unwrap(),
            "\"skip\""
        );
        let parsed: NoActivityPolicy = serde_json::from_str("\"suggestions\"").unwrap();
        assert_eq!(parsed, NoActivityPolicy::Suggestions);
    }

    #[test]
    fn test_digest_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&DigestStatus::Queued).unwrap(),
            "\"queued\""
        );
        let parsed: DigestStatus = serde_json::from_str("\"sent\"").unwrap();
        assert_eq!(parsed, DigestStatus::Sent);
    }

    #[test]
    fn test_decision_skips_null_fields() {
        let decision = DigestDecision {
            user_id: Uuid::nil(),
            decision: true,
            sent: true,
            skipped_reason: None,
            error: None,
        };
        let json = serde_json::to_string(&decision).unwrap();
        assert!(!json.contains("skipped_reason"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_update_preferences_partial_body() {
        let update: UpdateEmailPreferences =
            serde_json::from_str(r#"{"preferred_hour": 9}"#).unwrap();
        assert_eq!(update.preferred_hour, Some(9));
        assert!(update.timezone.is_none());
    }
}
