//! Aggregate exports: every conversation lives in one `conversations.json` array, with
//! optional `projects.json` and `memories.json` files beside it.
//!
//! The whole export is parsed once and kept until any of these files changes. Records that do not
//! fit the expected shape are counted and skipped; the rest of the export stays usable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::cache::{FileStamp, FingerprintBuilder, SourceFingerprint};
use super::deserializers::{deserialize_optional_timestamp, deserialize_uuid, null_as_default};
use super::{AdapterListing, MAX_EXPORT_BYTES, ensure_root};
use crate::citations::{CitationRef, SpanCitation, materialize_spans};
use crate::detector::{AGGREGATE_FILE, MEMORIES_FILE, PROJECTS_FILE};
use crate::error::{ArchiveError, Result};
use crate::models::{
    Conversation, ConversationMeta, ConversationSummary, Message, Role, Source, ThinkingStep,
};

pub const CONVERSATION_CATEGORY: &str = "All";
pub const PROJECT_CATEGORY: &str = "Projects";
const DEFAULT_MODEL: &str = "Claude";
const UNTITLED: &str = "Untitled";
const TITLE_SNIPPET_CHARS: usize = 80;
const MAX_SEARCH_RESULTS: usize = 12;

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(deserialize_with = "deserialize_uuid")]
    uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    chat_messages: Vec<RawChatMessage>,
}

#[derive(Debug, Deserialize)]
struct RawChatMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    sender: String,
    #[serde(default, deserialize_with = "null_as_default")]
    text: String,
    /// Parsed part by part at hydration so one odd part cannot sink the record.
    #[serde(default, deserialize_with = "null_as_default")]
    content: Vec<Value>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    #[serde(deserialize_with = "deserialize_uuid")]
    uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    prompt_template: String,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

/// First row of `memories.json`: free-text memory keyed by project uuid.
#[derive(Debug, Deserialize)]
struct RawMemories {
    #[serde(default, deserialize_with = "null_as_default")]
    project_memories: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text {
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
        #[serde(default, deserialize_with = "null_as_default")]
        citations: Vec<Value>,
    },
    Thinking {
        #[serde(default, deserialize_with = "null_as_default")]
        thinking: String,
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
        #[serde(default, deserialize_with = "null_as_default")]
        summaries: Vec<Value>,
    },
    ToolUse {
        #[serde(default, deserialize_with = "null_as_default")]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default, deserialize_with = "null_as_default")]
        name: String,
        #[serde(default)]
        content: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug)]
struct ClaudeExport {
    stamp: FileStamp,
    projects_stamp: Option<FileStamp>,
    memories_stamp: Option<FileStamp>,
    records: Vec<RawRecord>,
    by_uuid: HashMap<String, usize>,
    projects: Vec<RawProject>,
    memories: HashMap<String, String>,
    skipped: usize,
}

#[derive(Debug, Default)]
pub struct ClaudeAdapter {
    export: Mutex<Option<Arc<ClaudeExport>>>,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, source: &Source) -> Result<AdapterListing> {
        let export = self.load(&source.root_path)?;
        let mut summaries: Vec<ConversationSummary> = export
            .records
            .iter()
            .map(|record| ConversationSummary {
                id: record.uuid.clone(),
                title: record.title(),
                category: CONVERSATION_CATEGORY.to_string(),
                source_id: source.id.clone(),
                updated_at: record.updated_at.or(record.created_at),
            })
            .collect();
        summaries.extend(export.projects.iter().map(|project| ConversationSummary {
            id: project.uuid.clone(),
            title: project.title(),
            category: PROJECT_CATEGORY.to_string(),
            source_id: source.id.clone(),
            updated_at: project.updated_at.or(project.created_at),
        }));
        Ok(AdapterListing { summaries, skipped: export.skipped })
    }

    pub fn hydrate(&self, source: &Source, category: &str, id: &str) -> Result<Arc<Conversation>> {
        let export = self.load(&source.root_path)?;
        let conversation = match category {
            CONVERSATION_CATEGORY => export
                .by_uuid
                .get(id)
                .map(|&index| hydrate_record(&export.records[index])),
            PROJECT_CATEGORY => export
                .projects
                .iter()
                .find(|p| p.uuid == id)
                .map(|p| hydrate_project(p, export.memories.get(&p.uuid).map(String::as_str))),
            _ => None,
        };
        conversation.map(Arc::new).ok_or_else(|| {
            ArchiveError::NotFound(format!("conversation {category}/{id} in source {}", source.id))
        })
    }

    pub fn fingerprint(&self, source: &Source) -> SourceFingerprint {
        let root = source.root_path.as_path();
        let mut builder = FingerprintBuilder::new();
        builder.add(AGGREGATE_FILE, FileStamp::from_path(&root.join(AGGREGATE_FILE)).ok());
        builder.add(PROJECTS_FILE, FileStamp::from_path(&root.join(PROJECTS_FILE)).ok());
        builder.add(MEMORIES_FILE, FileStamp::from_path(&root.join(MEMORIES_FILE)).ok());
        builder.finish()
    }

    /// The parsed export, re-read only when a backing file changed.
    fn load(&self, root: &Path) -> Result<Arc<ClaudeExport>> {
        ensure_root(root)?;
        let path = root.join(AGGREGATE_FILE);
        let stamp = FileStamp::from_path(&path)
            .map_err(|_| ArchiveError::NotFound(format!("{} has no {AGGREGATE_FILE}", root.display())))?;
        let projects_path = root.join(PROJECTS_FILE);
        let projects_stamp = FileStamp::from_path(&projects_path).ok();
        let memories_path = root.join(MEMORIES_FILE);
        let memories_stamp = FileStamp::from_path(&memories_path).ok();

        if let Some(cached) = self.export.lock().as_ref()
            && cached.stamp == stamp
            && cached.projects_stamp == projects_stamp
            && cached.memories_stamp == memories_stamp
        {
            return Ok(Arc::clone(cached));
        }

        let (records, skipped_records) = read_array::<RawRecord>(&path)?;
        let (projects, skipped_projects) = match projects_stamp {
            Some(_) => read_array::<RawProject>(&projects_path).unwrap_or_else(|e| {
                warn!(path = %projects_path.display(), error = %e, "ignoring unreadable projects file");
                (Vec::new(), 0)
            }),
            None => (Vec::new(), 0),
        };
        let memories = match memories_stamp {
            Some(_) => read_project_memories(&memories_path).unwrap_or_else(|e| {
                warn!(path = %memories_path.display(), error = %e, "ignoring unreadable memories file");
                HashMap::new()
            }),
            None => HashMap::new(),
        };

        let mut kept = Vec::with_capacity(records.len());
        let mut by_uuid = HashMap::with_capacity(records.len());
        for record in records {
            if by_uuid.contains_key(&record.uuid) {
                warn!(uuid = %record.uuid, "duplicate conversation uuid, keeping the first record");
                continue;
            }
            by_uuid.insert(record.uuid.clone(), kept.len());
            kept.push(record);
        }

        let export = Arc::new(ClaudeExport {
            stamp,
            projects_stamp,
            memories_stamp,
            records: kept,
            by_uuid,
            projects,
            memories,
            skipped: skipped_records + skipped_projects,
        });
        info!(
            path = %path.display(),
            conversations = export.records.len(),
            projects = export.projects.len(),
            memories = export.memories.len(),
            skipped = export.skipped,
            "loaded aggregate export"
        );
        *self.export.lock() = Some(Arc::clone(&export));
        Ok(export)
    }
}

/// Parses a top-level JSON array, keeping the rows that fit `T` and counting the rest.
fn read_array<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<(Vec<T>, usize)> {
    let file = File::open(path)?;
    crate::utils::validate_file_size(&file, path, MAX_EXPORT_BYTES)?;
    let value: Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ArchiveError::format(path, e.to_string()))?;
    let Value::Array(rows) = value else {
        return Err(ArchiveError::format(path, "expected a top-level JSON array"));
    };

    let mut parsed = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (index, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<T>(row).with_context(|| format!("record {index}")) {
            Ok(item) => parsed.push(item),
            Err(e) => {
                debug!(path = %path.display(), error = format!("{e:#}"), "skipping malformed record");
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, kept = parsed.len(), "some records were malformed");
    }
    Ok((parsed, skipped))
}

fn read_project_memories(path: &Path) -> Result<HashMap<String, String>> {
    let (rows, _) = read_array::<RawMemories>(path)?;
    let memories = rows
        .into_iter()
        .next()
        .map(|row| row.project_memories)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(uuid, memory)| Some((uuid, memory.as_str()?.trim().to_string())))
        .filter(|(_, memory)| !memory.is_empty())
        .collect();
    Ok(memories)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.as_str().map(str::trim).filter(|s| !s.is_empty())
}

impl RawRecord {
    fn title(&self) -> String {
        let name = self.name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
        self.chat_messages
            .iter()
            .filter(|m| m.role() == Role::User)
            .map(|m| collapse_whitespace(&m.plain_text()))
            .find(|text| !text.is_empty())
            .map(|text| text.chars().take(TITLE_SNIPPET_CHARS).collect())
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    fn model_name(&self) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }
}

impl RawChatMessage {
    fn role(&self) -> Role {
        match self.sender.trim().to_ascii_lowercase().as_str() {
            "human" | "user" => Role::User,
            _ => Role::Assistant,
        }
    }

    /// The simplified `text` field, or the text parts when it is empty.
    fn plain_text(&self) -> String {
        if !self.text.trim().is_empty() {
            return self.text.clone();
        }
        self.content
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text")?.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl RawProject {
    fn title(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() { "Project".to_string() } else { name.to_string() }
    }
}

fn hydrate_record(record: &RawRecord) -> Conversation {
    let mut artifacts = Artifacts::default();
    let mut messages: Vec<Message> = record
        .chat_messages
        .iter()
        .filter_map(|message| convert_message(message, &mut artifacts))
        .collect();
    messages.extend(artifacts.into_messages(record.updated_at.or(record.created_at)));

    Conversation {
        id: record.uuid.clone(),
        title: record.title(),
        meta: ConversationMeta {
            model_slug: Some(record.model_name()),
            thinking_effort: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
        },
        messages,
    }
}

fn hydrate_project(project: &RawProject, memory: Option<&str>) -> Conversation {
    let mut blocks = Vec::new();
    let description = project.description.trim();
    if !description.is_empty() {
        blocks.push(format!("**Description**\n\n{description}"));
    }
    let template = project.prompt_template.trim();
    if !template.is_empty() {
        blocks.push(format!("**Prompt Template**\n\n```\n{template}\n```"));
    }
    if let Some(memory) = memory {
        blocks.push(format!("**Project Memory**\n\n{memory}"));
    }
    let content = if blocks.is_empty() { "(empty project)".to_string() } else { blocks.join("\n\n---\n\n") };

    Conversation {
        id: project.uuid.clone(),
        title: project.title(),
        meta: ConversationMeta {
            model_slug: Some(DEFAULT_MODEL.to_string()),
            thinking_effort: None,
            created_at: project.created_at,
            updated_at: project.updated_at,
        },
        messages: vec![
            Message::new(Role::Assistant, content).with_ts(project.updated_at.or(project.created_at)),
        ],
    }
}

fn convert_message(raw: &RawChatMessage, artifacts: &mut Artifacts) -> Option<Message> {
    let mut texts = Vec::new();
    let mut thinking = Vec::new();
    let mut summaries = Vec::new();
    let mut pending_searches: VecDeque<String> = VecDeque::new();
    let mut tool_output = Vec::new();

    for value in &raw.content {
        let Ok(part) = ContentPart::deserialize(value) else {
            continue;
        };
        match part {
            ContentPart::Text { text, citations } => {
                if !text.trim().is_empty() {
                    texts.push(materialize_spans(&text, &text_citation_spans(&citations)));
                }
            }
            ContentPart::Thinking { thinking: body, text, summaries: parts } => {
                let body = if body.trim().is_empty() { text } else { body };
                if !body.trim().is_empty() {
                    thinking.push(ThinkingStep {
                        title: Some("Thinking".to_string()),
                        content: body.trim().to_string(),
                        summary: None,
                    });
                }
                summaries.extend(parts.iter().filter_map(|s| str_field(s, "summary")).map(str::to_string));
            }
            ContentPart::ToolUse { name, input } => {
                if name.eq_ignore_ascii_case("web_search") {
                    pending_searches.push_back(str_field(&input, "query").unwrap_or_default().to_string());
                } else if name == "artifacts" {
                    artifacts.apply(&input);
                    continue;
                }
                tool_output.extend(string_payload(value));
            }
            ContentPart::ToolResult { name, content } => {
                if name.eq_ignore_ascii_case("web_search") {
                    let query = pending_searches.pop_front().unwrap_or_default();
                    thinking.push(web_search_step(&query, &content));
                }
                tool_output.extend(string_payload(value));
            }
            ContentPart::Other => {}
        }
    }
    // Searches whose results never arrived
    thinking.extend(pending_searches.iter().map(|query| web_search_step(query, &Value::Null)));

    let mut content = texts.join("\n").trim().to_string();
    if content.is_empty() && thinking.is_empty() {
        content = match raw.text.trim() {
            "" => tool_output.join("\n\n"),
            text => text.to_string(),
        };
    }

    let message = Message {
        role: raw.role(),
        content,
        thinking,
        thinking_summary: (!summaries.is_empty()).then(|| summaries.join("\n")),
        ts: raw.created_at.or(raw.updated_at),
    };
    (!message.is_blank()).then_some(message)
}

/// Span citations of a text part: `{start_index, end_index, details: {url, title}}`.
fn text_citation_spans(citations: &[Value]) -> Vec<SpanCitation> {
    citations
        .iter()
        .filter_map(|citation| {
            let start = usize::try_from(citation.get("start_index")?.as_u64()?).ok()?;
            let end = usize::try_from(citation.get("end_index")?.as_u64()?).ok()?;
            let details = citation.get("details");
            let url = str_field(citation, "url").or_else(|| details.and_then(|d| str_field(d, "url")))?;
            let title = details
                .and_then(|d| ["title", "source", "domain"].iter().find_map(|key| str_field(d, key)))
                .unwrap_or(url);
            Some(SpanCitation { start, end, reference: CitationRef::web(url, Some(title)) })
        })
        .collect()
}

/// Best-effort visible text of a tool part.
fn string_payload(part: &Value) -> Option<String> {
    const KEYS: [&str; 7] = ["content", "text", "output", "result", "markdown", "md", "thinking"];
    const INPUT_KEYS: [&str; 4] = ["content", "text", "md", "markdown"];
    KEYS.iter()
        .find_map(|key| str_field(part, key))
        .or_else(|| {
            let input = part.get("input")?;
            INPUT_KEYS.iter().find_map(|key| str_field(input, key))
        })
        .map(str::to_string)
}

fn web_search_step(query: &str, results: &Value) -> ThinkingStep {
    let items = results.as_array().map(Vec::as_slice).unwrap_or_default();
    let mut seen = HashSet::new();
    let lines: Vec<String> = items
        .iter()
        .filter_map(|item| {
            let url = str_field(item, "url")?;
            if !seen.insert(url) {
                return None;
            }
            let title = str_field(item, "title").unwrap_or(url);
            Some(format!("- [{title}]({url})"))
        })
        .take(MAX_SEARCH_RESULTS)
        .collect();

    let mut content = if query.is_empty() { "Web search".to_string() } else { query.to_string() };
    if !lines.is_empty() {
        content.push_str("\n\n");
        content.push_str(&lines.join("\n"));
    }
    ThinkingStep {
        title: Some("Web search".to_string()),
        content,
        summary: Some(format!("{} results", items.len())),
    }
}

/// Citation of an artifact span; offsets are in characters and may shift under edits.
#[derive(Debug, Clone)]
struct ArtifactCitation {
    start: i64,
    end: i64,
    url: String,
    title: Option<String>,
}

impl ArtifactCitation {
    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            start: value.get("start_index")?.as_i64()?,
            end: value.get("end_index")?.as_i64()?,
            url: str_field(value, "url")?.to_string(),
            title: str_field(value, "title").map(str::to_string),
        })
    }
}

#[derive(Debug, Default)]
struct Artifact {
    title: String,
    content: String,
    citations: Vec<ArtifactCitation>,
}

impl Artifact {
    /// Replaces the first occurrence of `old` and shifts citations past the edit.
    fn edit(&mut self, old: &str, new: &str) {
        if old.is_empty() {
            return;
        }
        let Some(byte_pos) = self.content.find(old) else {
            return;
        };
        let pos = self.content[..byte_pos].chars().count() as i64;
        let old_len = old.chars().count() as i64;
        let delta = new.chars().count() as i64 - old_len;
        self.content.replace_range(byte_pos..byte_pos + old.len(), new);

        let boundary = pos + old_len;
        for citation in &mut self.citations {
            if citation.start >= boundary {
                citation.start += delta;
                citation.end += delta;
            } else if citation.end >= boundary {
                citation.end += delta;
            }
        }
    }

    fn to_message(&self, ts: Option<DateTime<Utc>>) -> Option<Message> {
        if self.content.trim().is_empty() {
            return None;
        }
        let spans: Vec<SpanCitation> = self
            .citations
            .iter()
            .filter_map(|c| {
                let start = usize::try_from(c.start).ok()?;
                let end = usize::try_from(c.end).ok()?;
                let title = c.title.as_deref().unwrap_or(&c.url);
                Some(SpanCitation { start, end, reference: CitationRef::web(&c.url, Some(title)) })
            })
            .collect();
        let body = materialize_spans(&self.content, &spans);

        let mut content = String::from("**Deep Research Report**\n\n");
        if !self.title.is_empty() {
            content.push_str(&format!("_{}_\n\n", self.title));
        }
        content.push_str(body.trim());
        Some(Message::new(Role::Assistant, content).with_ts(ts))
    }
}

/// Artifacts created or edited across a conversation, in creation order.
#[derive(Debug, Default)]
struct Artifacts {
    order: Vec<String>,
    by_id: HashMap<String, Artifact>,
}

impl Artifacts {
    fn apply(&mut self, input: &Value) {
        let Some(id) = str_field(input, "id") else {
            return;
        };
        if !self.by_id.contains_key(id) {
            self.order.push(id.to_string());
        }
        let artifact = self.by_id.entry(id.to_string()).or_default();
        if artifact.title.is_empty()
            && let Some(title) = str_field(input, "title")
        {
            artifact.title = title.to_string();
        }
        if let Some(content) = input.get("content").and_then(Value::as_str).filter(|c| !c.trim().is_empty()) {
            artifact.content = content.to_string();
            if let Some(citations) = input.get("md_citations").and_then(Value::as_array) {
                artifact.citations = citations.iter().filter_map(ArtifactCitation::from_value).collect();
            }
        }
        if let (Some(old), Some(new)) =
            (input.get("old_str").and_then(Value::as_str), input.get("new_str").and_then(Value::as_str))
        {
            artifact.edit(old, new);
        }
    }

    fn into_messages(self, ts: Option<DateTime<Utc>>) -> Vec<Message> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id)?.to_message(ts))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::citations::extract_pills;
    use crate::models::SourceKind;

    const UUID_A: &str = "550e8400-e29b-41d4-a716-446655440000";
    const UUID_B: &str = "550e8400-e29b-41d4-a716-446655440001";
    const UUID_P: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    fn write_export(dir: &TempDir, conversations: Value) -> Source {
        fs::write(dir.path().join(AGGREGATE_FILE), serde_json::to_vec(&conversations).unwrap()).unwrap();
        Source::new("claude", SourceKind::Claude, dir.path())
    }

    fn record(uuid: &str, name: &str, messages: Value) -> Value {
        json!({
            "uuid": uuid,
            "name": name,
            "created_at": "2025-01-01T10:00:00Z",
            "updated_at": "2025-01-02T10:00:00Z",
            "chat_messages": messages
        })
    }

    #[test]
    fn test_list_counts_malformed_records() {
        let dir = TempDir::new().unwrap();
        let source = write_export(
            &dir,
            json!([
                record(UUID_A, "First", json!([])),
                record("not-a-uuid", "Broken", json!([])),
                record(UUID_B, "Second", json!([])),
            ]),
        );

        let listing = ClaudeAdapter::new().list(&source).unwrap();
        assert_eq!(listing.summaries.len(), 2);
        assert_eq!(listing.skipped, 1);
        assert!(listing.summaries.iter().all(|s| s.category == CONVERSATION_CATEGORY));
        assert_eq!(listing.summaries[0].updated_at.unwrap().to_rfc3339(), "2025-01-02T10:00:00+00:00");
    }

    #[test]
    fn test_non_array_export_is_format_error() {
        let dir = TempDir::new().unwrap();
        let source = write_export(&dir, json!({"conversations": []}));
        let err = ClaudeAdapter::new().list(&source).unwrap_err();
        assert!(matches!(err, ArchiveError::Format { .. }));
    }

    #[test]
    fn test_title_falls_back_to_first_prompt() {
        let dir = TempDir::new().unwrap();
        let source = write_export(
            &dir,
            json!([
                record(UUID_A, "  ", json!([{"sender": "human", "text": "  How do   lifetimes work?  "}])),
                record(UUID_B, "", json!([])),
            ]),
        );
        let listing = ClaudeAdapter::new().list(&source).unwrap();
        assert_eq!(listing.summaries[0].title, "How do lifetimes work?");
        assert_eq!(listing.summaries[1].title, UNTITLED);
    }

    #[test]
    fn test_hydrate_parts() {
        let dir = TempDir::new().unwrap();
        let source = write_export(
            &dir,
            json!([record(UUID_A, "Parts", json!([
                {"sender": "human", "text": "Find rust news", "content": [{"type": "text", "text": "Find rust news"}],
                 "created_at": "2025-01-01T10:00:00Z"},
                {"sender": "assistant", "text": "", "created_at": "2025-01-01T10:00:05Z", "content": [
                    {"type": "thinking", "thinking": "Let me search.", "summaries": [{"summary": "Planning"}]},
                    {"type": "tool_use", "name": "web_search", "input": {"query": "rust news"}},
                    {"type": "tool_result", "name": "web_search", "content": [
                        {"type": "knowledge", "title": "This Week in Rust", "url": "https://this-week-in-rust.org/"},
                        {"type": "knowledge", "title": "dup", "url": "https://this-week-in-rust.org/"}
                    ]},
                    {"type": "text", "text": "Rust 2024 shipped.", "citations": [
                        {"start_index": 0, "end_index": 18, "details": {"type": "web_search_citation", "url": "https://blog.rust-lang.org/x"}}
                    ]},
                    {"type": "image", "source": "ignored"}
                ]}
            ]))]),
        );

        let conversation = ClaudeAdapter::new().hydrate(&source, CONVERSATION_CATEGORY, UUID_A).unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.meta.model_slug.as_deref(), Some(DEFAULT_MODEL));

        let answer = &conversation.messages[1];
        assert!(answer.content.starts_with("Rust 2024 shipped. [rust-lang](<https://blog.rust-lang.org/x>"));
        assert_eq!(extract_pills(&answer.content).len(), 1);
        assert_eq!(answer.thinking.len(), 2);
        assert_eq!(answer.thinking[0].content, "Let me search.");
        assert_eq!(answer.thinking[1].title.as_deref(), Some("Web search"));
        assert!(answer.thinking[1].content.starts_with("rust news\n\n- [This Week in Rust]"));
        assert_eq!(answer.thinking[1].summary.as_deref(), Some("2 results"));
        assert_eq!(answer.thinking_summary.as_deref(), Some("Planning"));
    }

    #[test]
    fn test_text_field_used_when_parts_are_empty() {
        let dir = TempDir::new().unwrap();
        let source = write_export(
            &dir,
            json!([record(UUID_A, "Plain", json!([
                {"sender": "assistant", "text": "Plain answer", "content": []},
                {"sender": "assistant", "text": "", "content": []}
            ]))]),
        );
        let conversation = ClaudeAdapter::new().hydrate(&source, CONVERSATION_CATEGORY, UUID_A).unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].content, "Plain answer");
    }

    #[test]
    fn test_artifact_report_appended_with_edits() {
        let dir = TempDir::new().unwrap();
        let source = write_export(
            &dir,
            json!([record(UUID_A, "Research", json!([
                {"sender": "human", "text": "research it"},
                {"sender": "assistant", "text": "Done.", "content": [
                    {"type": "tool_use", "name": "artifacts", "input": {
                        "id": "report", "title": "Findings", "command": "create",
                        "content": "Intro. Claim here.",
                        "md_citations": [{"start_index": 7, "end_index": 18, "url": "https://example.org/a", "title": "A"}]
                    }},
                    {"type": "tool_use", "name": "artifacts", "input": {
                        "id": "report", "command": "update", "old_str": "Intro.", "new_str": "Longer intro."
                    }},
                    {"type": "text", "text": "Done."}
                ]}
            ]))]),
        );

        let conversation = ClaudeAdapter::new().hydrate(&source, CONVERSATION_CATEGORY, UUID_A).unwrap();
        let report = conversation.messages.last().unwrap();
        assert!(report.content.starts_with("**Deep Research Report**\n\n_Findings_\n\nLonger intro. Claim here. [example]"));
        assert_eq!(extract_pills(&report.content)[0].refs[0].title.as_deref(), Some("A"));
        assert_eq!(report.ts.unwrap().to_rfc3339(), "2025-01-02T10:00:00+00:00");
    }

    #[test]
    fn test_projects_listed_and_hydrated() {
        let dir = TempDir::new().unwrap();
        let source = write_export(&dir, json!([record(UUID_A, "Chat", json!([]))]));
        fs::write(
            dir.path().join(PROJECTS_FILE),
            serde_json::to_vec(&json!([{
                "uuid": UUID_P, "name": "Docs", "description": "Team docs",
                "prompt_template": "Be brief", "created_at": "2025-03-01T00:00:00Z"
            }]))
            .unwrap(),
        )
        .unwrap();

        let adapter = ClaudeAdapter::new();
        let listing = adapter.list(&source).unwrap();
        let project = listing.summaries.iter().find(|s| s.category == PROJECT_CATEGORY).unwrap();
        assert_eq!(project.title, "Docs");

        let conversation = adapter.hydrate(&source, PROJECT_CATEGORY, UUID_P).unwrap();
        assert_eq!(
            conversation.messages[0].content,
            "**Description**\n\nTeam docs\n\n---\n\n**Prompt Template**\n\n```\nBe brief\n```"
        );
    }

    #[test]
    fn test_project_memory_appended() {
        let dir = TempDir::new().unwrap();
        let source = write_export(&dir, json!([record(UUID_A, "Chat", json!([]))]));
        fs::write(
            dir.path().join(PROJECTS_FILE),
            serde_json::to_vec(&json!([{"uuid": UUID_P, "name": "Docs", "description": "Team docs"}])).unwrap(),
        )
        .unwrap();
        let adapter = ClaudeAdapter::new();
        let before = adapter.fingerprint(&source);
        assert_eq!(
            adapter.hydrate(&source, PROJECT_CATEGORY, UUID_P).unwrap().messages[0].content,
            "**Description**\n\nTeam docs"
        );

        fs::write(
            dir.path().join(MEMORIES_FILE),
            serde_json::to_vec(&json!([{"project_memories": {UUID_P: "  Prefers tables over prose.  ", UUID_B: 7}}]))
                .unwrap(),
        )
        .unwrap();
        assert_ne!(adapter.fingerprint(&source), before);
        let conversation = adapter.hydrate(&source, PROJECT_CATEGORY, UUID_P).unwrap();
        assert_eq!(
            conversation.messages[0].content,
            "**Description**\n\nTeam docs\n\n---\n\n**Project Memory**\n\nPrefers tables over prose."
        );
        assert!(conversation.search_body().contains("tables over prose"));
    }

    #[test]
    fn test_malformed_memories_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let source = write_export(&dir, json!([record(UUID_A, "Chat", json!([]))]));
        fs::write(dir.path().join(MEMORIES_FILE), b"{broken").unwrap();
        let listing = ClaudeAdapter::new().list(&source).unwrap();
        assert_eq!(listing.summaries.len(), 1);
        assert_eq!(listing.skipped, 0);
    }

    #[test]
    fn test_export_reloaded_after_change() {
        let dir = TempDir::new().unwrap();
        let source = write_export(&dir, json!([record(UUID_A, "One", json!([]))]));
        let adapter = ClaudeAdapter::new();
        assert_eq!(adapter.list(&source).unwrap().summaries.len(), 1);

        write_export(&dir, json!([record(UUID_A, "One", json!([])), record(UUID_B, "Two", json!([]))]));
        assert_eq!(adapter.list(&source).unwrap().summaries.len(), 2);
    }

    #[test]
    fn test_unknown_category_is_not_found() {
        let dir = TempDir::new().unwrap();
        let source = write_export(&dir, json!([record(UUID_A, "One", json!([]))]));
        let err = ClaudeAdapter::new().hydrate(&source, "Elsewhere", UUID_A).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }
}
