use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which sources a query runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "source_id")]
pub enum SearchScope {
    AllSources,
    OneSource(String),
}

impl SearchScope {
    pub fn includes(&self, source_id: &str) -> bool {
        match self {
            SearchScope::AllSources => true,
            SearchScope::OneSource(id) => id == source_id,
        }
    }
}

/// Byte range inside a snippet that matched a query token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub category: String,
    pub source: String,
    pub title: String,
    pub snippet: String,
    pub highlights: Vec<Highlight>,
    pub score: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub took_ms: u64,
    pub doc_count: usize,
}

/// Answer to a query. `ready == false` means the index for the current source set is
/// still being built and `results` reflect whatever was published so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub ready: bool,
    pub results: Vec<SearchHit>,
    pub stats: SearchStats,
}
