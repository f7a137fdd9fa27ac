//! Memory consolidation into the per-user profile document.
//!
//! Atomic `ChatMemory` rows accumulate per session; consolidation folds
//! them into the profile's typed buckets. Within a bucket, the strategy
//! decides what survives when it overflows:
//!
//! - `similarity`: near-duplicates merge (longer content wins), then the
//!   importance cap applies,
//! - `importance`: top entries by importance,
//! - `time`: most recent entries.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use mnema_core::{
    ChatMemory, ConsolidationSettings, ConsolidationStrategy, Error, MemoryRepository,
    MemoryType, ProfileMemoryEntry, ProfileRepository, Result,
};

/// Caller-supplied overrides for one consolidation run.
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    /// Restrict to these buckets; `None` means all four.
    pub memory_types: Option<Vec<MemoryType>>,
    /// Override the profile's configured strategy.
    pub strategy: Option<ConsolidationStrategy>,
    /// Run even when `auto_consolidate` is off.
    pub force: bool,
}

/// Per-bucket outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub memory_type: MemoryType,
    pub collected: usize,
    pub kept: usize,
    pub merged: usize,
    pub deactivated: usize,
}

/// Outcome of one consolidation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidateReport {
    pub ran: bool,
    pub buckets: Vec<BucketReport>,
}

/// Memory consolidator.
pub struct Consolidator {
    memories: Arc<dyn MemoryRepository>,
    profiles: Arc<dyn ProfileRepository>,
}

impl Consolidator {
    pub fn new(memories: Arc<dyn MemoryRepository>, profiles: Arc<dyn ProfileRepository>) -> Self {
        Self { memories, profiles }
    }

    /// Consolidate a user's active memories into their profile document.
    pub async fn consolidate(
        &self,
        user_id: Uuid,
        options: &ConsolidateOptions,
    ) -> Result<ConsolidateReport> {
        let profile = self
            .profiles
            .get(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("profile {}", user_id)))?;

        let settings = profile.memory_profile.consolidation_settings.clone();
        if !settings.auto_consolidate && !options.force {
            debug!(
                subsystem = "chat",
                component = "consolidate",
                user_id = %user_id,
                "Auto-consolidation disabled, skipping"
            );
            return Ok(ConsolidateReport {
                ran: false,
                buckets: vec![],
            });
        }

        let strategy = options.strategy.unwrap_or(settings.consolidation_strategy);
        let types: Vec<MemoryType> = options
            .memory_types
            .clone()
            .unwrap_or_else(|| MemoryType::ALL.to_vec());

        let mut memory_profile = profile.memory_profile.clone();
        let mut report = ConsolidateReport {
            ran: true,
            buckets: Vec::new(),
        };

        for memory_type in types {
            let rows = self.memories.active_for_user(user_id, memory_type).await?;
            if rows.is_empty() {
                continue;
            }

            let collected = rows.len();
            let (entries, subsumed_ids, merged) = consolidate_bucket(rows, strategy, &settings);

            let deactivated = self.memories.deactivate(&subsumed_ids).await? as usize;
            let kept = entries.len();
            *memory_profile.bucket_mut(memory_type) = entries;

            report.buckets.push(BucketReport {
                memory_type,
                collected,
                kept,
                merged,
                deactivated,
            });
        }

        memory_profile.last_consolidated = Some(Utc::now());
        self.profiles
            .save_memory_profile(user_id, &memory_profile)
            .await?;

        info!(
            subsystem = "chat",
            component = "consolidate",
            user_id = %user_id,
            buckets = report.buckets.len(),
            "Consolidation complete"
        );

        Ok(report)
    }
}

/// Fold one bucket's rows into profile entries.
///
/// Returns `(entries, subsumed_row_ids, merge_count)`.
fn consolidate_bucket(
    rows: Vec<ChatMemory>,
    strategy: ConsolidationStrategy,
    settings: &ConsolidationSettings,
) -> (Vec<ProfileMemoryEntry>, Vec<Uuid>, usize) {
    let cap = settings.max_memories_per_type.max(1);

    match strategy {
        ConsolidationStrategy::Similarity => {
            let mut entries: Vec<ProfileMemoryEntry> = Vec::new();
            let mut subsumed: Vec<Uuid> = Vec::new();
            let mut merged = 0usize;

            // Rows arrive importance-desc; high-importance content anchors
            // each cluster.
            for row in rows {
                let existing = entries
                    .iter_mut()
                    .find(|e| text_similarity(&e.content, &row.content) > settings.consolidation_threshold);

                match existing {
                    Some(entry) => {
                        merged += 1;
                        subsumed.push(row.id);
                        if row.content.chars().count() > entry.content.chars().count() {
                            entry.content = row.content.clone();
                        }
                        entry.importance_score = entry.importance_score.max(row.importance_score);
                        entry.source_ids.push(row.id);
                    }
                    None => entries.push(ProfileMemoryEntry {
                        content: row.content.clone(),
                        importance_score: row.importance_score,
                        updated_at: row.updated_at,
                        source_ids: vec![row.id],
                    }),
                }
            }

            entries.sort_by(|a, b| {
                b.importance_score
                    .partial_cmp(&a.importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            entries.truncate(cap);
            (entries, subsumed, merged)
        }
        ConsolidationStrategy::Importance => {
            let mut rows = rows;
            rows.sort_by(|a, b| {
                b.importance_score
                    .partial_cmp(&a.importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            rows.truncate(cap);
            (entries_from_rows(&rows), vec![], 0)
        }
        ConsolidationStrategy::Time => {
            let mut rows = rows;
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            rows.truncate(cap);
            (entries_from_rows(&rows), vec![], 0)
        }
    }
}

fn entries_from_rows(rows: &[ChatMemory]) -> Vec<ProfileMemoryEntry> {
    rows.iter()
        .map(|row| ProfileMemoryEntry {
            content: row.content.clone(),
            importance_score: row.importance_score,
            updated_at: row.updated_at,
            source_ids: vec![row.id],
        })
        .collect()
}

/// Jaccard similarity over word sets (characters for CJK content).
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

fn token_set(text: &str) -> HashSet<String> {
    let has_cjk = text
        .chars()
        .any(|c| matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3040}'..='\u{30FF}' | '\u{AC00}'..='\u{D7AF}'));

    if has_cjk {
        text.chars()
            .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
            .map(|c| c.to_string())
            .collect()
    } else {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| c.is_ascii_punctuation())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }
}
