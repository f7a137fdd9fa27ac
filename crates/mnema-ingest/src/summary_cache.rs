//! Per-URL summary work record.
//!
//! A process-local monitor map coalescing concurrent summary work: for any
//! URL at most one task is ever `generating`; later callers either reuse a
//! completed entry or await the in-flight one. Entries expire after the
//! TTL and are evicted on access.
//!
//! The metadata-preview endpoint warms this cache so a later full ingest
//! of the same URL can skip its summary call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

use mnema_core::defaults;

/// Externally visible status of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryStatus {
    Generating,
    Completed { summary: String },
    Failed { error: String },
}

impl SummaryStatus {
    /// Wire name used by the status endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Generating => "generating",
            SummaryStatus::Completed { .. } => "completed",
            SummaryStatus::Failed { .. } => "failed",
        }
    }
}

/// Outcome of a `begin` call.
#[derive(Debug, Clone)]
pub enum Begin {
    /// The caller owns generation for this URL and must later call
    /// `complete` or `fail`.
    Started,
    /// A fresh completed summary already exists.
    Cached(String),
    /// Another task is generating; the caller may `wait_for` it.
    InFlight,
}

enum EntryState {
    Generating(Arc<Notify>),
    Completed(String),
    Failed(String),
}

struct Entry {
    state: EntryState,
    created_at: Instant,
}

/// Process-local summary cache.
pub struct SummaryCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl SummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cache with the standard one-hour TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(defaults::SUMMARY_CACHE_TTL_SECS))
    }

    /// Atomic begin: claim generation, reuse a fresh result, or report an
    /// in-flight task. Expired and failed entries restart generation.
    pub fn begin(&self, url: &str) -> Begin {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(url) {
            if entry.created_at.elapsed() < self.ttl {
                match &entry.state {
                    EntryState::Generating(_) => return Begin::InFlight,
                    EntryState::Completed(summary) => return Begin::Cached(summary.clone()),
                    // A failed terminal state is worth retrying.
                    EntryState::Failed(_) => {}
                }
            }
        }

        debug!(
            subsystem = "ingest",
            component = "summary_cache",
            url = %url,
            "Claiming summary generation"
        );
        entries.insert(
            url.to_string(),
            Entry {
                state: EntryState::Generating(Arc::new(Notify::new())),
                created_at: Instant::now(),
            },
        );
        Begin::Started
    }

    /// Terminal transition: generation succeeded.
    pub fn complete(&self, url: &str, summary: String) {
        self.finish(url, EntryState::Completed(summary));
    }

    /// Terminal transition: generation failed.
    pub fn fail(&self, url: &str, error: String) {
        self.finish(url, EntryState::Failed(error));
    }

    fn finish(&self, url: &str, state: EntryState) {
        let mut entries = self.entries.lock().unwrap();
        let notify = match entries.get(url) {
            Some(Entry {
                state: EntryState::Generating(notify),
                ..
            }) => Some(notify.clone()),
            _ => None,
        };

        entries.insert(
            url.to_string(),
            Entry {
                state,
                created_at: Instant::now(),
            },
        );
        drop(entries);

        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// Current status. Expired entries are evicted and read as absent.
    pub fn get(&self, url: &str) -> Option<SummaryStatus> {
        let mut entries = self.entries.lock().unwrap();

        let expired = entries
            .get(url)
            .map(|entry| entry.created_at.elapsed() >= self.ttl)
            .unwrap_or(false);
        if expired {
            entries.remove(url);
            return None;
        }

        entries.get(url).map(|entry| match &entry.state {
            EntryState::Generating(_) => SummaryStatus::Generating,
            EntryState::Completed(summary) => SummaryStatus::Completed {
                summary: summary.clone(),
            },
            EntryState::Failed(error) => SummaryStatus::Failed {
                error: error.clone(),
            },
        })
    }

    /// Await a terminal state for an in-flight URL, bounded by `timeout`.
    /// Returns the latest status (possibly still `Generating` on timeout).
    pub async fn wait_for(&self, url: &str, timeout: Duration) -> Option<SummaryStatus> {
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let entries = self.entries.lock().unwrap();
                match entries.get(url) {
                    Some(Entry {
                        state: EntryState::Generating(notify),
                        ..
                    }) => notify.clone(),
                    _ => return self.get(url),
                }
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.get(url);
            }

            let _ = tokio::time::timeout(remaining, notify.notified()).await;
        }
    }

    /// Number of live (unexpired) entries; sweeps expired ones.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_absent_starts() {
        let cache = SummaryCache::with_default_ttl();
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        assert_eq!(cache.get("https://a"), Some(SummaryStatus::Generating));
    }

    #[test]
    fn test_begin_in_flight_coalesces() {
        let cache = SummaryCache::with_default_ttl();
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        assert!(matches!(cache.begin("https://a"), Begin::InFlight));
    }

    #[test]
    fn test_begin_returns_cached_summary() {
        let cache = SummaryCache::with_default_ttl();
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        cache.complete("https://a", "the gist".to_string());

        match cache.begin("https://a") {
            Begin::Cached(summary) => assert_eq!(summary, "the gist"),
            other => panic!("expected cached, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_entry_restarts_generation() {
        let cache = SummaryCache::with_default_ttl();
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        cache.fail("https://a", "upstream 500".to_string());
        assert!(matches!(cache.begin("https://a"), Begin::Started));
    }

    #[test]
    fn test_expired_entry_reads_as_absent() {
        let cache = SummaryCache::new(Duration::from_millis(0));
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        cache.complete("https://a", "s".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("https://a"), None);
    }

    #[test]
    fn test_expired_completed_restarts() {
        let cache = SummaryCache::new(Duration::from_millis(0));
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        cache.complete("https://a", "s".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(cache.begin("https://a"), Begin::Started));
    }

    #[test]
    fn test_urls_are_independent() {
        let cache = SummaryCache::with_default_ttl();
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        assert!(matches!(cache.begin("https://b"), Begin::Started));
        cache.complete("https://a", "A".to_string());
        assert_eq!(cache.get("https://b"), Some(SummaryStatus::Generating));
    }

    #[test]
    fn test_len_sweeps_expired() {
        let cache = SummaryCache::new(Duration::from_millis(0));
        assert!(matches!(cache.begin("https://a"), Begin::Started));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_observes_completion() {
        let cache = Arc::new(SummaryCache::with_default_ttl());
        assert!(matches!(cache.begin("https://a"), Begin::Started));

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .wait_for("https://a", Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.complete("https://a", "done".to_string());

        let status = waiter.await.unwrap();
        assert_eq!(
            status,
            Some(SummaryStatus::Completed {
                summary: "done".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_wait_for_times_out_while_generating() {
        let cache = SummaryCache::with_default_ttl();
        assert!(matches!(cache.begin("https://a"), Begin::Started));

        let status = cache
            .wait_for("https://a", Duration::from_millis(30))
            .await;
        assert_eq!(status, Some(SummaryStatus::Generating));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(SummaryStatus::Generating.as_str(), "generating");
        assert_eq!(
            SummaryStatus::Completed {
                summary: String::new()
            }
            .as_str(),
            "completed"
        );
        assert_eq!(
            SummaryStatus::Failed {
                error: String::new()
            }
            .as_str(),
            "failed"
        );
    }
}
