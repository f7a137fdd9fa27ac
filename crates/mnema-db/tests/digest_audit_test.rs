//! Digest audit CAS and suppression integration tests.
//!
//! Run against a live PostgreSQL with `TEST_DATABASE_URL` set:
//! `cargo test -- --ignored`.

use chrono::NaiveDate;
use uuid::Uuid;

use mnema_core::EmailRepository;
use mnema_db::Database;

async fn test_db() -> Database {
    let url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/mnema_test".to_string());
    Database::connect(&url).await.expect("test database reachable")
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn begin_digest_is_idempotent_per_week() {
    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let week = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();

    let (first, created_first) = db.email.begin_digest(user_id, week).await.unwrap();
    assert!(created_first);

    let (second, created_second) = db.email.begin_digest(user_id, week).await.unwrap();
    assert!(!created_second);
    assert_eq!(first.id, second.id);

    // A different week gets its own row.
    let next_week = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
    let (_, created_next) = db.email.begin_digest(user_id, next_week).await.unwrap();
    assert!(created_next);
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn sent_digest_survives_status_transitions() {
    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let week = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();

    let (digest, _) = db.email.begin_digest(user_id, week).await.unwrap();
    db.email
        .mark_digest_sent(digest.id, "<m@brevo>", &serde_json::json!({"ok": true}))
        .await
        .unwrap();

    let stored = db.email.get_digest(user_id, week).await.unwrap().unwrap();
    assert_eq!(stored.message_id.as_deref(), Some("<m@brevo>"));
    assert_eq!(
        serde_json::to_value(stored.status).unwrap(),
        serde_json::json!("sent")
    );
}

#[tokio::test]
#[ignore = "requires a live PostgreSQL"]
async fn suppression_roundtrip_and_token_stability() {
    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let email = format!("user-{}@example.com", user_id);

    assert!(!db.email.is_suppressed(&email).await.unwrap());
    db.email.add_suppression(&email, "bounce").await.unwrap();
    assert!(db.email.is_suppressed(&email).await.unwrap());
    // Re-adding is a no-op, not an error.
    db.email.add_suppression(&email, "complaint").await.unwrap();

    let token_a = db.email.get_or_create_unsubscribe_token(user_id).await.unwrap();
    let token_b = db.email.get_or_create_unsubscribe_token(user_id).await.unwrap();
    assert_eq!(token_a, token_b);

    let resolved = db.email.resolve_unsubscribe_token(&token_a).await.unwrap();
    assert_eq!(resolved, Some(user_id));
    assert!(db
        .email
        .resolve_unsubscribe_token("no-such-token")
        .await
        .unwrap()
        .is_none());
}
