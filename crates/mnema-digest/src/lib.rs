//! # mnema-digest
//!
//! Timezone-aware weekly digest fan-out: per-user send decisions, payload
//! assembly with an LLM narrative, idempotent audit rows, transactional
//! delivery via Brevo, and webhook-driven suppression.

pub mod brevo;
pub mod builder;
pub mod dispatcher;
pub mod schedule;
pub mod webhook;

pub use brevo::{BrevoClient, BrevoConfig, DEFAULT_BREVO_URL};
pub use builder::{DigestBuilder, DigestPayload, NO_ACTIVITY_NARRATIVE};
pub use dispatcher::{DigestDispatcher, DispatcherConfig};
pub use schedule::{compute_window, should_send_now, week_start};
pub use webhook::{WebhookHandler, WebhookOutcome};
