//! Brevo webhook ingestion.
//!
//! Every event lands in `email_events`; delivery-damaging events
//! (bounce, complaint, unsubscribe, block) also add a suppression row
//! that the next dispatch consults.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use mnema_core::{EmailRepository, Result};
use mnema_db::Database;

/// Events that suppress future sends, with the recorded reason.
fn suppression_reason(event: &str) -> Option<&'static str> {
    match event {
        "bounced" | "hard_bounce" | "soft_bounce" => Some("bounce"),
        "spam" | "complaint" => Some("complaint"),
        "unsubscribed" => Some("unsubscribe"),
        "blocked" => Some("block"),
        _ => None,
    }
}

/// Outcome of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Recorded { event: String, suppressed: bool },
    Ignored { reason: &'static str },
}

/// Brevo event payload handler.
pub struct WebhookHandler {
    db: Database,
}

impl WebhookHandler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Process one provider event payload.
    pub async fn process(&self, payload: &JsonValue) -> Result<WebhookOutcome> {
        let event = payload.get("event").and_then(|v| v.as_str());
        let message_id = payload
            .get("message-id")
            .or_else(|| payload.get("messageId"))
            .and_then(|v| v.as_str());

        let (Some(event), Some(message_id)) = (event, message_id) else {
            warn!(
                subsystem = "digest",
                component = "webhook",
                "Dropping event without event type or message id"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: "missing_fields",
            });
        };

        let email = payload.get("email").and_then(|v| v.as_str());
        let occurred_at = payload
            .get("date")
            .and_then(|v| v.as_str())
            .and_then(parse_event_time)
            .unwrap_or_else(Utc::now);

        self.db
            .email
            .record_event(message_id, event, email, payload, occurred_at)
            .await?;

        let mut suppressed = false;
        if let (Some(reason), Some(email)) = (suppression_reason(event), email) {
            self.db.email.add_suppression(email, reason).await?;
            suppressed = true;
            info!(
                subsystem = "digest",
                component = "webhook",
                event,
                reason,
                "Added email suppression"
            );
        }

        debug!(
            subsystem = "digest",
            component = "webhook",
            event,
            suppressed,
            "Webhook event recorded"
        );

        Ok(WebhookOutcome::Recorded {
            event: event.to_string(),
            suppressed,
        })
    }
}

/// Brevo sends ISO-8601 with or without a zone suffix.
fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_reasons() {
        assert_eq!(suppression_reason("bounced"), Some("bounce"));
        assert_eq!(suppression_reason("hard_bounce"), Some("bounce"));
        assert_eq!(suppression_reason("spam"), Some("complaint"));
        assert_eq!(suppression_reason("unsubscribed"), Some("unsubscribe"));
        assert_eq!(suppression_reason("blocked"), Some("block"));
        assert_eq!(suppression_reason("delivered"), None);
        assert_eq!(suppression_reason("opened"), None);
    }

    #[test]
    fn test_parse_event_time_rfc3339() {
        let parsed = parse_event_time("2025-09-10T13:00:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-09-10T13:00:00+00:00");
    }

    #[test]
    fn test_parse_event_time_naive() {
        assert!(parse_event_time("2025-09-10 13:00:00").is_some());
    }

    #[test]
    fn test_parse_event_time_garbage() {
        assert!(parse_event_time("yesterday-ish").is_none());
    }
}
