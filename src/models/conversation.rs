use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One step of supplementary reasoning attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ThinkingStep {
    pub fn new(content: impl Into<String>) -> Self {
        Self { title: None, content: content.into(), summary: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// The primary answer. Thinking never stands in for it, even when empty.
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thinking: Vec<ThinkingStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_summary: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub ts: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), thinking: Vec::new(), thinking_summary: None, ts: None }
    }

    pub fn with_ts(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.ts = ts;
        self
    }

    /// True when the message carries nothing worth showing.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
            && self.thinking.is_empty()
            && self.thinking_summary.as_deref().is_none_or(|s| s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A fully hydrated conversation in vendor-neutral form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub meta: ConversationMeta,
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Body text fed to the search index: message contents plus thinking.
    pub fn search_body(&self) -> String {
        let mut body = String::new();
        for message in &self.messages {
            push_line(&mut body, &message.content);
            for step in &message.thinking {
                push_line(&mut body, &step.content);
                if let Some(summary) = &step.summary {
                    push_line(&mut body, summary);
                }
            }
            if let Some(summary) = &message.thinking_summary {
                push_line(&mut body, summary);
            }
        }
        body
    }
}

fn push_line(buf: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(text);
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub category: String,
    pub source_id: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of listing one source: summaries grouped by category plus the number of
/// records that failed to parse and were left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationListing {
    pub categories: BTreeMap<String, Vec<ConversationSummary>>,
    pub skipped: usize,
}

impl ConversationListing {
    /// Group summaries by category, newest first inside each category.
    pub fn from_summaries(summaries: Vec<ConversationSummary>, skipped: usize) -> Self {
        let mut categories: BTreeMap<String, Vec<ConversationSummary>> = BTreeMap::new();
        for summary in summaries {
            categories.entry(summary.category.clone()).or_default().push(summary);
        }
        for items in categories.values_mut() {
            items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        }
        Self { categories, skipped }
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summaries(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.categories.values().flatten()
    }

    pub fn find(&self, category: &str, id: &str) -> Option<&ConversationSummary> {
        self.categories.get(category)?.iter().find(|s| s.id == id)
    }
}
