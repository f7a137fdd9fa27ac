//! User profile and the consolidated memory document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chat::MemoryType;

/// 1:1 with the auth identity. `id` equals the auth user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub memory_profile: MemoryProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Strategy used when a type bucket overflows during consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStrategy {
    /// Pairwise merge above the similarity threshold.
    Similarity,
    /// Keep the top entries by importance.
    Importance,
    /// Keep the most recent entries.
    Time,
}

impl Default for ConsolidationStrategy {
    fn default() -> Self {
        ConsolidationStrategy::Similarity
    }
}

/// User-editable consolidation knobs, stored inside the memory document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSettings {
    pub auto_consolidate: bool,
    pub consolidation_threshold: f64,
    pub max_memories_per_type: usize,
    pub consolidation_strategy: ConsolidationStrategy,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self {
            auto_consolidate: true,
            consolidation_threshold: crate::defaults::CONSOLIDATION_THRESHOLD,
            max_memories_per_type: crate::defaults::MAX_MEMORIES_PER_TYPE,
            consolidation_strategy: ConsolidationStrategy::default(),
        }
    }
}

/// One consolidated entry inside a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMemoryEntry {
    pub content: String,
    pub importance_score: f32,
    pub updated_at: DateTime<Utc>,
    /// ChatMemory rows folded into this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<Uuid>,
}

/// The structured memory document on the profile row.
///
/// Versioned so future shapes can migrate; readers tolerate missing
/// buckets (all fields default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryProfile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub preferences: Vec<ProfileMemoryEntry>,
    #[serde(default)]
    pub facts: Vec<ProfileMemoryEntry>,
    #[serde(default)]
    pub context: Vec<ProfileMemoryEntry>,
    #[serde(default)]
    pub insights: Vec<ProfileMemoryEntry>,
    #[serde(default)]
    pub last_consolidated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consolidation_settings: ConsolidationSettings,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for MemoryProfile {
    fn default() -> Self {
        Self {
            schema_version: 1,
            preferences: Vec::new(),
            facts: Vec::new(),
            context: Vec::new(),
            insights: Vec::new(),
            last_consolidated: None,
            consolidation_settings: ConsolidationSettings::default(),
        }
    }
}

impl MemoryProfile {
    /// Access a bucket by memory type.
    pub fn bucket(&self, memory_type: MemoryType) -> &Vec<ProfileMemoryEntry> {
        match memory_type {
            MemoryType::UserPreference => &self.preferences,
            MemoryType::Fact => &self.facts,
            MemoryType::Context => &self.context,
            MemoryType::Insight => &self.insights,
        }
    }

    /// Mutable bucket access by memory type.
    pub fn bucket_mut(&mut self, memory_type: MemoryType) -> &mut Vec<ProfileMemoryEntry> {
        match memory_type {
            MemoryType::UserPreference => &mut self.preferences,
            MemoryType::Fact => &mut self.facts,
            MemoryType::Context => &mut self.context,
            MemoryType::Insight => &mut self.insights,
        }
    }

    /// Total consolidated entries across all buckets.
    pub fn total_entries(&self) -> usize {
        self.preferences.len() + self.facts.len() + self.context.len() + self.insights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_profile_tolerates_missing_buckets() {
        let profile: MemoryProfile = serde_json::from_str("{}").unwrap();
        assert_eq!(profile.schema_version, 1);
        assert!(profile.preferences.is_empty());
        assert!(profile.last_consolidated.is_none());
        assert!(profile.consolidation_settings.auto_consolidate);
    }

    #[test]
    fn test_memory_profile_bucket_roundtrip() {
        let mut profile = MemoryProfile::default();
        profile.bucket_mut(MemoryType::Fact).push(ProfileMemoryEntry {
            content: "prefers dark mode".to_string(),
            importance_score: 0.7,
            updated_at: Utc::now(),
            source_ids: vec![],
        });
        assert_eq!(profile.bucket(MemoryType::Fact).len(), 1);
        assert_eq!(profile.total_entries(), 1);
    }

    #[test]
    fn test_consolidation_settings_defaults() {
        let settings = ConsolidationSettings::default();
        assert_eq!(settings.max_memories_per_type, 50);
        assert!((settings.consolidation_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(
            settings.consolidation_strategy,
            ConsolidationStrategy::Similarity
        );
    }

    #[test]
    fn test_strategy_wire_format() {
        assert_eq!(
            serde_json::to_string(&ConsolidationStrategy::Similarity).unwrap(),
            "\"similarity\""
        );
        let parsed: ConsolidationStrategy = serde_json::from_str("\"time\"").unwrap();
        assert_eq!(parsed, ConsolidationStrategy::Time);
    }
}
