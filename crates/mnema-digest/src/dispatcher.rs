//! Weekly digest dispatcher.
//!
//! Cron fires at most hourly; the dispatcher walks every digest
//! candidate, decides per user whether their local slot matches, and
//! sends at most once per `(user, week_start)` via the CAS audit row.
//! One user's failure never blocks another's digest.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use mnema_core::{
    defaults, DigestCandidate, DigestDecision, DigestStatus, DigestSweepResult, EmailDigest,
    EmailPreferences, EmailRepository, Error, NoActivityPolicy, Result,
};
use mnema_db::Database;

use crate::builder::{DigestBuilder, DigestPayload};
use crate::brevo::BrevoClient;
use crate::schedule::{compute_window, should_send_now, week_start};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Base URL for unsubscribe links in email headers.
    pub unsubscribe_base_url: String,
    pub max_retries: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            unsubscribe_base_url: "https://app.mnema.io".to_string(),
            max_retries: defaults::DIGEST_MAX_RETRIES,
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            unsubscribe_base_url: std::env::var("UNSUBSCRIBE_BASE_URL")
                .unwrap_or(defaults.unsubscribe_base_url),
            max_retries: defaults.max_retries,
        }
    }
}

/// Pre-audit schedule gate: the reason a candidate is skipped before any
/// row is touched, or `None` to proceed. `force` bypasses everything
/// here; suppression and the audit row are checked separately because
/// they bind even under force.
fn schedule_skip(
    prefs: &EmailPreferences,
    has_insights: bool,
    now_utc: DateTime<Utc>,
    force: bool,
) -> Option<&'static str> {
    if force {
        return None;
    }
    if !prefs.weekly_digest_enabled {
        return Some("disabled");
    }
    if !should_send_now(
        &prefs.timezone,
        prefs.preferred_day,
        prefs.preferred_hour,
        now_utc,
    ) {
        return Some("not_send_time");
    }
    if !has_insights && prefs.no_activity_policy == NoActivityPolicy::Skip {
        return Some("no_activity");
    }
    None
}

/// What to do with the `(user, week_start)` audit row after the CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuditAction {
    /// Fresh row (or requeued failure): build and send.
    Proceed,
    /// Prior attempt failed with retry budget left: requeue, then send.
    Requeue,
    /// Nothing to do this sweep.
    Skip(&'static str),
}

fn audit_action(digest: &EmailDigest, created: bool, max_retries: i32) -> AuditAction {
    if created {
        return AuditAction::Proceed;
    }
    match digest.status {
        DigestStatus::Sent => AuditAction::Skip("already_sent"),
        DigestStatus::Failed if digest.retry_count < max_retries => AuditAction::Requeue,
        DigestStatus::Failed => AuditAction::Skip("retries_exhausted"),
        // Another sweep owns this row right now.
        DigestStatus::Queued => AuditAction::Skip("in_progress"),
    }
}

/// Template parameters and headers for one send.
///
/// The payload document itself is the template's `params` — flat, never
/// nested under another `params` key. The unsubscribe link travels only
/// in the `List-Unsubscribe` header.
fn digest_email_request(
    payload: &DigestPayload,
    unsubscribe_url: &str,
) -> Result<(JsonValue, HashMap<String, String>)> {
    let params = serde_json::to_value(payload)?;

    let mut headers = HashMap::new();
    headers.insert(
        "List-Unsubscribe".to_string(),
        format!("<{}>", unsubscribe_url),
    );

    Ok((params, headers))
}

/// The digest dispatcher.
pub struct DigestDispatcher {
    db: Database,
    builder: DigestBuilder,
    brevo: Arc<BrevoClient>,
    config: DispatcherConfig,
}

impl DigestDispatcher {
    pub fn new(
        db: Database,
        builder: DigestBuilder,
        brevo: Arc<BrevoClient>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            db,
            builder,
            brevo,
            config,
        }
    }

    /// Run one sweep over all candidates. `force` bypasses the schedule
    /// and enabled flag but still honors suppression and idempotency.
    pub async fn run_sweep(&self, now_utc: DateTime<Utc>, force: bool) -> Result<DigestSweepResult> {
        let candidates = self.db.email.digest_candidates().await?;
        let mut result = DigestSweepResult::default();

        info!(
            subsystem = "digest",
            op = "sweep",
            candidates = candidates.len(),
            force,
            "Starting digest sweep"
        );

        for candidate in candidates {
            let decision = match self.process_candidate(&candidate, now_utc, force).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(
                        subsystem = "digest",
                        user_id = %candidate.user_id,
                        error = %e,
                        "Digest processing failed"
                    );
                    DigestDecision {
                        user_id: candidate.user_id,
                        decision: true,
                        sent: false,
                        skipped_reason: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            result.processed += 1;
            if decision.sent {
                result.sent += 1;
            } else if decision.error.is_some() {
                result.failed += 1;
            } else {
                result.skipped += 1;
            }
            result.decisions.push(decision);
        }

        info!(
            subsystem = "digest",
            op = "sweep",
            processed = result.processed,
            sent = result.sent,
            skipped = result.skipped,
            failed = result.failed,
            "Digest sweep complete"
        );

        Ok(result)
    }

    /// Decide and (maybe) send for one candidate.
    async fn process_candidate(
        &self,
        candidate: &DigestCandidate,
        now_utc: DateTime<Utc>,
        force: bool,
    ) -> Result<DigestDecision> {
        let skip = |reason: &str| DigestDecision {
            user_id: candidate.user_id,
            decision: false,
            sent: false,
            skipped_reason: Some(reason.to_string()),
            error: None,
        };

        if let Some(reason) =
            schedule_skip(&candidate.preferences, candidate.has_insights, now_utc, force)
        {
            return Ok(skip(reason));
        }

        // Suppression binds even under force.
        if self.db.email.is_suppressed(&candidate.email).await? {
            return Ok(skip("suppressed"));
        }

        let week = week_start(now_utc);
        let (digest, created) = self.db.email.begin_digest(candidate.user_id, week).await?;

        match audit_action(&digest, created, self.config.max_retries) {
            AuditAction::Skip(reason) => return Ok(skip(reason)),
            AuditAction::Requeue => self.db.email.requeue_digest(digest.id).await?,
            AuditAction::Proceed => {}
        }

        match self.send_digest(candidate, now_utc, digest.id).await {
            Ok(()) => Ok(DigestDecision {
                user_id: candidate.user_id,
                decision: true,
                sent: true,
                skipped_reason: None,
                error: None,
            }),
            Err(e) => {
                self.db
                    .email
                    .mark_digest_failed(digest.id, &e.to_string())
                    .await?;
                Ok(DigestDecision {
                    user_id: candidate.user_id,
                    decision: true,
                    sent: false,
                    skipped_reason: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Build the payload, generate the narrative, call the provider.
    async fn send_digest(
        &self,
        candidate: &DigestCandidate,
        now_utc: DateTime<Utc>,
        digest_id: Uuid,
    ) -> Result<()> {
        let (window_start, window_end) = compute_window(now_utc);
        let week = week_start(now_utc);

        let payload = self
            .builder
            .build(
                candidate.user_id,
                &candidate.email,
                candidate.nickname.as_deref(),
                &candidate.preferences.timezone,
                window_start,
                window_end,
                week,
            )
            .await?;

        let token = self
            .db
            .email
            .get_or_create_unsubscribe_token(candidate.user_id)
            .await?;
        let unsubscribe_url = format!(
            "{}/unsubscribe?token={}",
            self.config.unsubscribe_base_url.trim_end_matches('/'),
            token
        );

        let (params, headers) = digest_email_request(&payload, &unsubscribe_url)?;

        let message_id = self
            .brevo
            .send_template(
                &candidate.email,
                candidate.nickname.as_deref(),
                self.brevo.digest_template_id(),
                params.clone(),
                headers,
            )
            .await?;

        self.db
            .email
            .mark_digest_sent(digest_id, &message_id, &params)
            .await?;

        info!(
            subsystem = "digest",
            op = "send",
            user_id = %candidate.user_id,
            digest_id = %digest_id,
            week_start = %week,
            "Digest sent"
        );

        Ok(())
    }

    /// Owner-triggered test send. `dry_run` builds the payload without
    /// calling the provider or writing audit rows.
    pub async fn test_send(
        &self,
        user_id: Uuid,
        dry_run: bool,
        force: bool,
        email_override: Option<&str>,
    ) -> Result<serde_json::Value> {
        let candidates = self.db.email.digest_candidates().await?;
        let mut candidate = candidates
            .into_iter()
            .find(|c| c.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("digest preferences for {}", user_id)))?;

        if let Some(email) = email_override {
            candidate.email = email.to_string();
        }

        let now_utc = Utc::now();

        if dry_run {
            let (window_start, window_end) = compute_window(now_utc);
            let payload = self
                .builder
                .build(
                    candidate.user_id,
                    &candidate.email,
                    candidate.nickname.as_deref(),
                    &candidate.preferences.timezone,
                    window_start,
                    window_end,
                    week_start(now_utc),
                )
                .await?;
            return Ok(serde_json::json!({ "dry_run": true, "payload": payload }));
        }

        let decision = self.process_candidate(&candidate, now_utc, force).await?;
        Ok(serde_json::to_value(decision)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    use crate::builder::{
        ActivitySummary, DigestMetadata, DigestSections, DigestUserBlock,
    };

    fn prefs(enabled: bool, policy: NoActivityPolicy) -> EmailPreferences {
        EmailPreferences {
            user_id: Uuid::new_v4(),
            weekly_digest_enabled: enabled,
            preferred_day: 2,
            preferred_hour: 22,
            timezone: "Asia/Tokyo".to_string(),
            no_activity_policy: policy,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Wednesday 13:00 UTC = Wednesday 22:00 in Tokyo — the slot `prefs`
    /// asks for.
    fn matching_now() -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2025, 9, 10)
                .unwrap()
                .and_hms_opt(13, 0, 0)
                .unwrap(),
        )
    }

    fn digest_row(status: DigestStatus, retry_count: i32) -> EmailDigest {
        EmailDigest {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            week_start: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            status,
            payload: None,
            message_id: None,
            error: None,
            retry_count,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_payload() -> DigestPayload {
        DigestPayload {
            user: DigestUserBlock {
                nickname: "Rin".to_string(),
                email: "rin@example.com".to_string(),
                timezone: "Asia/Tokyo".to_string(),
            },
            activity_summary: ActivitySummary {
                insights_count: 3,
                tagged_count: 1,
            },
            sections: DigestSections {
                highlights: vec![],
                more_content: vec![],
                stacks: vec![],
                suggestions: "keep saving".to_string(),
                tags: vec![],
            },
            ai_summary: "Three reads about retrieval this week.".to_string(),
            metadata: DigestMetadata {
                generated_at: Utc::now(),
                week_start: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            },
        }
    }

    // ── schedule gate ────────────────────────────────────────────────

    #[test]
    fn test_schedule_skip_disabled() {
        let prefs = prefs(false, NoActivityPolicy::Skip);
        assert_eq!(
            schedule_skip(&prefs, true, matching_now(), false),
            Some("disabled")
        );
    }

    #[test]
    fn test_schedule_skip_wrong_slot() {
        let prefs = prefs(true, NoActivityPolicy::Skip);
        // One hour before the preferred Tokyo slot.
        let early = matching_now() - chrono::Duration::hours(1);
        assert_eq!(
            schedule_skip(&prefs, true, early, false),
            Some("not_send_time")
        );
    }

    #[test]
    fn test_schedule_skip_no_activity_with_skip_policy() {
        let prefs = prefs(true, NoActivityPolicy::Skip);
        assert_eq!(
            schedule_skip(&prefs, false, matching_now(), false),
            Some("no_activity")
        );
    }

    #[test]
    fn test_schedule_proceeds_on_quiet_week_with_brief_policy() {
        let prefs = prefs(true, NoActivityPolicy::Brief);
        assert_eq!(schedule_skip(&prefs, false, matching_now(), false), None);
    }

    #[test]
    fn test_schedule_proceeds_in_matching_slot() {
        let prefs = prefs(true, NoActivityPolicy::Skip);
        assert_eq!(schedule_skip(&prefs, true, matching_now(), false), None);
    }

    #[test]
    fn test_force_bypasses_enabled_flag_and_slot() {
        let prefs = prefs(false, NoActivityPolicy::Skip);
        let off_slot = matching_now() - chrono::Duration::hours(5);
        assert_eq!(schedule_skip(&prefs, false, off_slot, true), None);
    }

    // ── audit row ────────────────────────────────────────────────────

    #[test]
    fn test_audit_fresh_row_proceeds() {
        let digest = digest_row(DigestStatus::Queued, 0);
        assert_eq!(audit_action(&digest, true, 3), AuditAction::Proceed);
    }

    #[test]
    fn test_audit_sent_row_skips_idempotently() {
        let digest = digest_row(DigestStatus::Sent, 0);
        assert_eq!(
            audit_action(&digest, false, 3),
            AuditAction::Skip("already_sent")
        );
    }

    #[test]
    fn test_audit_failed_row_requeues_within_budget() {
        let digest = digest_row(DigestStatus::Failed, 2);
        assert_eq!(audit_action(&digest, false, 3), AuditAction::Requeue);
    }

    #[test]
    fn test_audit_failed_row_exhausted() {
        let digest = digest_row(DigestStatus::Failed, 3);
        assert_eq!(
            audit_action(&digest, false, 3),
            AuditAction::Skip("retries_exhausted")
        );
    }

    #[test]
    fn test_audit_queued_row_owned_by_other_sweep() {
        let digest = digest_row(DigestStatus::Queued, 0);
        assert_eq!(
            audit_action(&digest, false, 3),
            AuditAction::Skip("in_progress")
        );
    }

    // ── provider request shape ───────────────────────────────────────

    #[test]
    fn test_email_request_params_are_the_flat_payload() {
        let payload = sample_payload();
        let (params, _) =
            digest_email_request(&payload, "https://app.example.com/unsubscribe?token=t1")
                .unwrap();

        // The payload document IS the params object — no extra nesting.
        assert_eq!(params, serde_json::to_value(&payload).unwrap());
        assert!(params.get("params").is_none());
        assert_eq!(params["user"]["email"], "rin@example.com");
        assert_eq!(params["activity_summary"]["insights_count"], 3);
        assert_eq!(params["ai_summary"], "Three reads about retrieval this week.");
        assert_eq!(params["metadata"]["week_start"], "2025-09-08");
    }

    #[test]
    fn test_email_request_unsubscribe_only_in_header() {
        let payload = sample_payload();
        let url = "https://app.example.com/unsubscribe?token=t1";
        let (params, headers) = digest_email_request(&payload, url).unwrap();

        assert_eq!(headers["List-Unsubscribe"], format!("<{}>", url));
        assert!(params.get("unsubscribe_url").is_none());
    }
}
