//! Digest payload assembly.
//!
//! Collects one user's week of insights, groups them by tag, and asks the
//! LLM for a short narrative. The payload shape is the email template's
//! `params` contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use mnema_core::{
    defaults, ContentRepository, GenerationBackend, Insight, InsightRepository, PromptMessage,
    Result, UserTag,
};
use mnema_db::Database;

const DIGEST_NARRATIVE_PROMPT: &str = "You write a short, warm weekly reading recap. Given the \
list of articles a user saved this week (titles and summaries), write 2-4 sentences connecting the \
themes and encouraging them to keep going. Write in the dominant language of the titles. No \
greetings, no sign-off, no bullet points.";

/// Fallback narrative when the week had no activity.
pub const NO_ACTIVITY_NARRATIVE: &str =
    "A quiet week — nothing new was saved. Maybe the perfect time to revisit an old favorite.";

/// One item inside a digest section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestItem {
    pub insight_id: Uuid,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub saved_at: DateTime<Utc>,
}

/// Tag section entry: a tag name with the joined titles filed under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagGroup {
    pub name: String,
    pub articles: String,
}

/// Grouping of items by source domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub domain: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSections {
    pub highlights: Vec<DigestItem>,
    pub more_content: Vec<DigestItem>,
    pub stacks: Vec<Stack>,
    pub suggestions: String,
    pub tags: Vec<TagGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestUserBlock {
    pub nickname: String,
    pub email: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub insights_count: usize,
    pub tagged_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestMetadata {
    pub generated_at: DateTime<Utc>,
    pub week_start: NaiveDate,
}

/// The full template payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestPayload {
    pub user: DigestUserBlock,
    pub activity_summary: ActivitySummary,
    pub sections: DigestSections,
    pub ai_summary: String,
    pub metadata: DigestMetadata,
}

/// Digest payload builder.
pub struct DigestBuilder {
    db: Database,
    generator: Arc<dyn GenerationBackend>,
}

impl DigestBuilder {
    pub fn new(db: Database, generator: Arc<dyn GenerationBackend>) -> Self {
        Self { db, generator }
    }

    /// Build the payload for one user and week window.
    pub async fn build(
        &self,
        user_id: Uuid,
        email: &str,
        nickname: Option<&str>,
        timezone: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        week_start: NaiveDate,
    ) -> Result<DigestPayload> {
        let insights_with_tags = self
            .db
            .insights
            .window_with_tags(user_id, window_start, window_end)
            .await?;

        let insights_count = insights_with_tags.len();
        let tagged_count = insights_with_tags
            .iter()
            .filter(|(_, tags)| !tags.is_empty())
            .count();

        let mut items = Vec::with_capacity(insights_count);
        for (insight, _) in &insights_with_tags {
            items.push(self.item_for(insight).await);
        }

        let highlights: Vec<DigestItem> =
            items.iter().take(defaults::DIGEST_HIGHLIGHTS).cloned().collect();
        let more_content: Vec<DigestItem> = items
            .iter()
            .skip(defaults::DIGEST_HIGHLIGHTS)
            .take(defaults::DIGEST_MORE_CONTENT_CAP)
            .cloned()
            .collect();

        let stacks = group_stacks(&items);
        let tags = group_tags(&insights_with_tags);
        let suggestions = suggest(insights_count, tagged_count);

        let ai_summary = if insights_count == 0 {
            NO_ACTIVITY_NARRATIVE.to_string()
        } else {
            self.narrative(&items).await
        };

        debug!(
            subsystem = "digest",
            component = "builder",
            user_id = %user_id,
            result_count = insights_count,
            "Digest payload built"
        );

        Ok(DigestPayload {
            user: DigestUserBlock {
                nickname: nickname.unwrap_or("there").to_string(),
                email: email.to_string(),
                timezone: timezone.to_string(),
            },
            activity_summary: ActivitySummary {
                insights_count,
                tagged_count,
            },
            sections: DigestSections {
                highlights,
                more_content,
                stacks,
                suggestions,
                tags,
            },
            ai_summary,
            metadata: DigestMetadata {
                generated_at: Utc::now(),
                week_start,
            },
        })
    }

    async fn item_for(&self, insight: &Insight) -> DigestItem {
        // The generated summary beats the page description when present.
        let summary = match self.db.contents.get(insight.id).await {
            Ok(Some(content)) => content.summary.or_else(|| insight.description.clone()),
            _ => insight.description.clone(),
        };

        DigestItem {
            insight_id: insight.id,
            title: insight
                .title
                .clone()
                .unwrap_or_else(|| insight.url.clone()),
            url: insight.url.clone(),
            summary,
            saved_at: insight.created_at,
        }
    }

    async fn narrative(&self, items: &[DigestItem]) -> String {
        let listing: String = items
            .iter()
            .map(|item| {
                format!(
                    "- {}{}\n",
                    item.title,
                    item.summary
                        .as_deref()
                        .map(|s| format!(": {}", s))
                        .unwrap_or_default()
                )
            })
            .collect();

        let messages = vec![
            PromptMessage::system(DIGEST_NARRATIVE_PROMPT),
            PromptMessage::user(format!("This week's saved articles:\n{}", listing)),
        ];

        match self.generator.generate(&messages).await {
            Ok(completion) => completion.content.trim().to_string(),
            Err(e) => {
                // Digest still goes out without the narrative slot filled.
                warn!(
                    subsystem = "digest",
                    component = "builder",
                    error = %e,
                    "Narrative generation failed, using fallback"
                );
                format!("You saved {} new insights this week.", items.len())
            }
        }
    }
}

fn group_tags(insights: &[(Insight, Vec<UserTag>)]) -> Vec<TagGroup> {
    let mut by_tag: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (insight, tags) in insights {
        let title = insight.title.as_deref().unwrap_or(insight.url.as_str());
        for tag in tags {
            by_tag.entry(tag.name.clone()).or_default().push(title);
        }
    }

    by_tag
        .into_iter()
        .map(|(name, titles)| TagGroup {
            name,
            articles: titles.join(", "),
        })
        .collect()
}

fn group_stacks(items: &[DigestItem]) -> Vec<Stack> {
    let mut by_domain: BTreeMap<String, usize> = BTreeMap::new();
    for item in items {
        if let Ok(parsed) = url::Url::parse(&item.url) {
            if let Some(host) = parsed.host_str() {
                *by_domain.entry(host.to_string()).or_default() += 1;
            }
        }
    }

    let mut stacks: Vec<Stack> = by_domain
        .into_iter()
        .map(|(domain, count)| Stack { domain, count })
        .collect();
    stacks.sort_by(|a, b| b.count.cmp(&a.count).then(a.domain.cmp(&b.domain)));
    stacks
}

fn suggest(insights_count: usize, tagged_count: usize) -> String {
    if insights_count == 0 {
        "Save one interesting link this week to get your digest going.".to_string()
    } else if tagged_count * 2 < insights_count {
        "Most of this week's saves are untagged — a few tags will make them easier to find later."
            .to_string()
    } else {
        "Nice tagging discipline. Try asking the assistant what connects this week's reads."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> DigestItem {
        DigestItem {
            insight_id: Uuid::new_v4(),
            title: "T".to_string(),
            url: url.to_string(),
            summary: None,
            saved_at: Utc::now(),
        }
    }

    fn insight(title: &str) -> Insight {
        Insight {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            url: "https://example.com/a".to_string(),
            title: Some(title.to_string()),
            description: None,
            image_url: None,
            thought: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn tag(name: &str) -> UserTag {
        UserTag {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            color: "#808080".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_group_tags_joins_titles() {
        let insights = vec![
            (insight("First"), vec![tag("rust")]),
            (insight("Second"), vec![tag("rust"), tag("ml")]),
        ];
        let groups = group_tags(&insights);
        assert_eq!(groups.len(), 2);
        let rust = groups.iter().find(|g| g.name == "rust").unwrap();
        assert_eq!(rust.articles, "First, Second");
        let ml = groups.iter().find(|g| g.name == "ml").unwrap();
        assert_eq!(ml.articles, "Second");
    }

    #[test]
    fn test_group_stacks_counts_domains() {
        let items = vec![
            item("https://a.com/1"),
            item("https://a.com/2"),
            item("https://b.org/1"),
        ];
        let stacks = group_stacks(&items);
        assert_eq!(stacks[0].domain, "a.com");
        assert_eq!(stacks[0].count, 2);
        assert_eq!(stacks[1].domain, "b.org");
    }

    #[test]
    fn test_suggestions_by_tagging_ratio() {
        assert!(suggest(0, 0).contains("Save one interesting link"));
        assert!(suggest(10, 2).contains("untagged"));
        assert!(suggest(10, 8).contains("tagging discipline"));
    }

    #[test]
    fn test_payload_serializes_week_start_as_date() {
        let payload = DigestPayload {
            user: DigestUserBlock {
                nickname: "n".to_string(),
                email: "e@example.com".to_string(),
                timezone: "Asia/Tokyo".to_string(),
            },
            activity_summary: ActivitySummary {
                insights_count: 1,
                tagged_count: 0,
            },
            sections: DigestSections {
                highlights: vec![],
                more_content: vec![],
                stacks: vec![],
                suggestions: String::new(),
                tags: vec![],
            },
            ai_summary: "s".to_string(),
            metadata: DigestMetadata {
                generated_at: Utc::now(),
                week_start: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["metadata"]["week_start"], "2025-09-08");
    }
}
