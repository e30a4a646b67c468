//! Per-file exports: one JSON document per conversation, grouped into category folders.
//!
//! Files are named `Title_id.json`. Listing reads only the header fields of each file and
//! caches them by [`FileStamp`], so re-listing an unchanged tree does no parsing at all.
//! Hydration walks the message tree along the active branch. Gemini web captures saved
//! into the same tree are recognized by their `batchexecute_raw` payload and handed to
//! [`batchexecute`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::cache::{FileStamp, FingerprintBuilder, SourceFingerprint};
use super::batchexecute;
use super::deserializers::{deserialize_optional_timestamp, null_as_default, parse_rfc3339};
use super::{AdapterListing, ensure_root};
use crate::citations::CitationResolver;
use crate::error::{ArchiveError, Result};
use crate::models::{
    Conversation, ConversationMeta, ConversationSummary, Message, Role, Source, ThinkingStep,
};
use crate::utils::{relative_slash_path, validate_file_size};

pub const MAX_CONVERSATION_BYTES: u64 = 64 * 1024 * 1024;
/// Category of files placed directly in the source root.
pub const ROOT_CATEGORY: &str = "All";
const HYDRATED_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(32).expect("capacity is non-zero");

#[derive(Debug, Clone)]
struct ConversationHeader {
    title: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CachedHeader {
    stamp: FileStamp,
    /// `None` when the file is not a conversation document.
    header: Option<ConversationHeader>,
}

#[derive(Debug)]
pub struct ChatgptAdapter {
    headers: Mutex<HashMap<PathBuf, CachedHeader>>,
    locations: Mutex<HashMap<(String, String), PathBuf>>,
    /// Recently hydrated conversations, valid while their file stamp holds.
    hydrated: Mutex<LruCache<PathBuf, (FileStamp, Arc<Conversation>)>>,
}

impl Default for ChatgptAdapter {
    fn default() -> Self {
        Self {
            headers: Mutex::default(),
            locations: Mutex::default(),
            hydrated: Mutex::new(LruCache::new(HYDRATED_CACHE_CAPACITY)),
        }
    }
}

impl ChatgptAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, source: &Source) -> Result<AdapterListing> {
        let root = source.root_path.as_path();
        ensure_root(root)?;

        let stamped: Vec<(PathBuf, Option<FileStamp>)> = conversation_files(root)
            .into_iter()
            .map(|path| {
                let stamp = FileStamp::from_path(&path).ok();
                (path, stamp)
            })
            .collect();

        let stale: Vec<(PathBuf, FileStamp)> = {
            let headers = self.headers.lock();
            stamped
                .iter()
                .filter_map(|(path, stamp)| {
                    let stamp = (*stamp)?;
                    match headers.get(path) {
                        Some(cached) if cached.stamp == stamp => None,
                        _ => Some((path.clone(), stamp)),
                    }
                })
                .collect()
        };

        let parsed: Vec<(PathBuf, CachedHeader)> = stale
            .into_par_iter()
            .map(|(path, stamp)| {
                let header = match read_header(&path) {
                    Ok(header) => Some(header),
                    Err(e) => {
                        warn!(path = %path.display(), error = format!("{e:#}"), "skipping malformed conversation file");
                        None
                    }
                };
                (path, CachedHeader { stamp, header })
            })
            .collect();
        let reparsed = parsed.len();

        let mut headers = self.headers.lock();
        headers.extend(parsed);
        let live: HashSet<&PathBuf> = stamped.iter().map(|(path, _)| path).collect();
        headers.retain(|path, _| live.contains(path));

        let mut summaries = Vec::with_capacity(stamped.len());
        let mut locations = HashMap::with_capacity(stamped.len());
        let mut skipped = 0;
        for (path, stamp) in &stamped {
            let cached = stamp.and_then(|_| headers.get(path));
            let Some(CachedHeader { stamp, header: Some(header) }) = cached else {
                skipped += 1;
                continue;
            };
            let (file_title, id) = split_file_name(path);
            let category = category_for(root, path);
            let key = (category.clone(), id.clone());
            if locations.contains_key(&key) {
                warn!(path = %path.display(), category, id, "duplicate conversation id, keeping the first file");
                continue;
            }
            summaries.push(ConversationSummary {
                id,
                title: header.title.clone().unwrap_or(file_title),
                category,
                source_id: source.id.clone(),
                updated_at: header.updated_at.or(header.created_at).or_else(|| stamp.modified_at()),
            });
            locations.insert(key, path.clone());
        }
        drop(headers);
        *self.locations.lock() = locations;

        debug!(source = %source.id, conversations = summaries.len(), skipped, reparsed, "listed per-file export");
        Ok(AdapterListing { summaries, skipped })
    }

    pub fn hydrate(&self, source: &Source, category: &str, id: &str) -> Result<Arc<Conversation>> {
        let key = (category.to_string(), id.to_string());
        let known = self.locations.lock().get(&key).cloned();
        let path = match known {
            Some(path) => path,
            None => {
                self.list(source)?;
                let relisted = self.locations.lock().get(&key).cloned();
                relisted.ok_or_else(|| not_found(source, category, id))?
            }
        };

        let stamp = FileStamp::from_path(&path).map_err(|_| not_found(source, category, id))?;
        if let Some((cached, conversation)) = self.hydrated.lock().get(&path)
            && *cached == stamp
        {
            return Ok(Arc::clone(conversation));
        }

        let conversation = Arc::new(parse_conversation_file(&path, id)?);
        self.hydrated.lock().put(path, (stamp, Arc::clone(&conversation)));
        Ok(conversation)
    }

    pub fn fingerprint(&self, source: &Source) -> SourceFingerprint {
        let root = source.root_path.as_path();
        let mut builder = FingerprintBuilder::new();
        for path in conversation_files(root) {
            let key = relative_slash_path(root, &path).unwrap_or_default();
            builder.add(&key, FileStamp::from_path(&path).ok());
        }
        builder.finish()
    }
}

fn not_found(source: &Source, category: &str, id: &str) -> ArchiveError {
    ArchiveError::NotFound(format!("conversation {category}/{id} in source {}", source.id))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

/// All `*.json` files under `root`, sorted. Hidden entries and symlinks are skipped.
fn conversation_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// `Trip plans_abc123.json` → (`Trip plans`, `abc123`). Without a usable `_` the stem is both.
pub fn split_file_name(path: &Path) -> (String, String) {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    match stem.rsplit_once('_') {
        Some((title, id)) if !title.is_empty() && !id.is_empty() => (title.to_string(), id.to_string()),
        _ => (stem.clone(), stem),
    }
}

fn category_for(root: &Path, path: &Path) -> String {
    path.parent()
        .filter(|parent| *parent != root)
        .and_then(|parent| relative_slash_path(root, parent))
        .filter(|rel| !rel.is_empty())
        .unwrap_or_else(|| ROOT_CATEGORY.to_string())
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    create_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    update_time: Option<DateTime<Utc>>,
    // A message tree or a web capture; other JSON files are not conversations
    #[serde(default)]
    mapping: Option<IgnoredAny>,
    #[serde(default)]
    batchexecute_raw: Option<IgnoredAny>,
    #[serde(default)]
    conversation_id: Option<IgnoredAny>,
    #[serde(default)]
    fetched_at: Option<Value>,
}

fn open_checked(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)?;
    validate_file_size(&file, path, MAX_CONVERSATION_BYTES)?;
    Ok(BufReader::new(file))
}

fn read_header(path: &Path) -> anyhow::Result<ConversationHeader> {
    let raw: RawHeader =
        serde_json::from_reader(open_checked(path)?).context("not a conversation document")?;
    let fetched_at = raw.fetched_at.as_ref().and_then(Value::as_str);
    let capture = raw.batchexecute_raw.is_some() && (raw.conversation_id.is_some() || fetched_at.is_some());
    if raw.mapping.is_none() && !capture {
        anyhow::bail!("not a conversation document");
    }
    let title = raw.title.trim();
    Ok(ConversationHeader {
        title: (!title.is_empty()).then(|| title.to_string()),
        created_at: raw.create_time,
        updated_at: raw.update_time.or_else(|| fetched_at.and_then(parse_rfc3339)),
    })
}

#[derive(Debug, Deserialize)]
struct RawConversation {
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    create_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    update_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    mapping: BTreeMap<String, RawNode>,
    #[serde(default)]
    current_node: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    parent: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    children: Vec<String>,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    author: RawAuthor,
    #[serde(default, deserialize_with = "null_as_default")]
    content: RawContent,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    create_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    update_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawAuthor {
    #[serde(default, deserialize_with = "null_as_default")]
    role: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default, deserialize_with = "null_as_default")]
    content_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    parts: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    thoughts: Vec<RawThought>,
    /// Recap text of `reasoning_recap` messages.
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawThought {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    is_visually_hidden_from_conversation: bool,
    #[serde(default)]
    content_references: Option<Value>,
    #[serde(default)]
    model_slug: Option<String>,
    #[serde(default)]
    default_model_slug: Option<String>,
    #[serde(default)]
    thinking_effort: Option<String>,
    #[serde(default)]
    async_task_type: Option<String>,
    #[serde(default)]
    async_task_id: Option<String>,
}

impl RawMetadata {
    /// Pro-mode reasoning arrives as tool-role text from an async task.
    fn is_pro_mode(&self) -> bool {
        self.async_task_type.as_deref() == Some("pro_mode")
            || (self.async_task_id.is_some()
                && self.model_slug.as_deref().is_some_and(|slug| slug.ends_with("-pro")))
    }

    fn model(&self) -> Option<String> {
        self.model_slug
            .as_deref()
            .or(self.default_model_slug.as_deref())
            .filter(|slug| !slug.is_empty())
            .map(str::to_string)
    }
}

fn parse_conversation_file(path: &Path, id: &str) -> Result<Conversation> {
    let doc: Value = serde_json::from_reader(open_checked(path)?)
        .map_err(|e| ArchiveError::format(path, e.to_string()))?;
    let (file_title, _) = split_file_name(path);
    if batchexecute::is_capture(&doc) {
        let capture: batchexecute::RawCapture =
            serde_json::from_value(doc).map_err(|e| ArchiveError::format(path, e.to_string()))?;
        return batchexecute::build_conversation(id, &file_title, &capture)
            .map_err(|e| ArchiveError::format(path, format!("{e:#}")));
    }
    let raw: RawConversation =
        serde_json::from_value(doc).map_err(|e| ArchiveError::format(path, e.to_string()))?;
    Ok(build_conversation(id, &file_title, &raw))
}

fn build_conversation(id: &str, fallback_title: &str, raw: &RawConversation) -> Conversation {
    let fragments: Vec<Fragment> = active_branch(&raw.mapping, raw.current_node.as_deref())
        .into_iter()
        .filter_map(|node_id| raw.mapping.get(node_id)?.message.as_ref())
        .filter(|m| !(m.author.role == "system" && m.metadata.is_visually_hidden_from_conversation))
        .filter_map(extract_fragment)
        .collect();

    let title = raw.title.trim();
    Conversation {
        id: id.to_string(),
        title: if title.is_empty() { fallback_title.to_string() } else { title.to_string() },
        meta: ConversationMeta {
            created_at: raw.create_time,
            updated_at: raw.update_time,
            ..latest_model_meta(&raw.mapping)
        },
        messages: merge_fragments(fragments),
    }
}

/// Node ids from the root to the visible leaf.
fn active_branch<'a>(mapping: &'a BTreeMap<String, RawNode>, current: Option<&'a str>) -> Vec<&'a str> {
    let mut path = Vec::new();
    let mut seen = HashSet::new();

    if let Some(leaf) = current.filter(|id| mapping.contains_key(*id)) {
        let mut cursor = Some(leaf);
        while let Some(id) = cursor {
            if !seen.insert(id) {
                break;
            }
            path.push(id);
            cursor = mapping.get(id).and_then(|node| node.parent.as_deref());
        }
        path.reverse();
        return path;
    }

    // No usable leaf: start at the root and follow first children
    let mut cursor = mapping
        .iter()
        .find(|(_, node)| node.parent.as_deref().is_none_or(|p| !mapping.contains_key(p)))
        .map(|(id, _)| id.as_str());
    while let Some(id) = cursor {
        if !seen.insert(id) {
            break;
        }
        path.push(id);
        cursor = mapping.get(id).and_then(|node| node.children.first()).map(String::as_str);
    }
    path
}

#[derive(Debug, Default)]
struct AssistantPart {
    thinking: Vec<ThinkingStep>,
    summary: Option<String>,
    text: Option<String>,
    ts: Option<DateTime<Utc>>,
}

impl AssistantPart {
    fn absorb(&mut self, next: AssistantPart) {
        self.thinking.extend(next.thinking);
        if next.summary.is_some() {
            self.summary = next.summary;
        }
        if let Some(text) = next.text {
            self.text = Some(match self.text.take() {
                Some(mut joined) => {
                    joined.push_str("\n\n");
                    joined.push_str(&text);
                    joined
                }
                None => text,
            });
        }
        self.ts = match (self.ts, next.ts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    fn into_message(self) -> Option<Message> {
        let message = Message {
            role: Role::Assistant,
            content: self.text.unwrap_or_default(),
            thinking: self.thinking,
            thinking_summary: self.summary,
            ts: self.ts,
        };
        (!message.is_blank()).then_some(message)
    }
}

#[derive(Debug)]
enum Fragment {
    User { content: String, ts: Option<DateTime<Utc>> },
    Assistant(AssistantPart),
}

fn joined_parts(parts: &[Value]) -> String {
    parts.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("\n")
}

fn extract_fragment(message: &RawMessage) -> Option<Fragment> {
    let resolver = CitationResolver::from_json(message.metadata.content_references.as_ref());
    let ts = message.create_time.or(message.update_time);
    let content = &message.content;

    match (message.author.role.as_str(), content.content_type.as_str()) {
        ("user", "text" | "multimodal_text") => {
            let text = joined_parts(&content.parts);
            (!text.trim().is_empty()).then(|| Fragment::User { content: resolver.apply(&text), ts })
        }
        ("tool", "text") if message.metadata.is_pro_mode() => {
            let text = joined_parts(&content.parts);
            let text = text.trim();
            (!text.is_empty()).then(|| {
                Fragment::Assistant(AssistantPart {
                    thinking: vec![ThinkingStep::new(resolver.apply(text))],
                    ts,
                    ..Default::default()
                })
            })
        }
        ("assistant", "thoughts") => {
            let thinking = content
                .thoughts
                .iter()
                .map(|thought| ThinkingStep {
                    title: None,
                    content: resolver.apply(&thought.content),
                    summary: thought.summary.as_deref().map(|s| resolver.apply(s)),
                })
                .collect();
            Some(Fragment::Assistant(AssistantPart { thinking, ts, ..Default::default() }))
        }
        ("assistant", "reasoning_recap") => {
            let recap = content.content.as_ref().and_then(Value::as_str).unwrap_or_default();
            Some(Fragment::Assistant(AssistantPart {
                summary: Some(resolver.apply(recap)),
                ts,
                ..Default::default()
            }))
        }
        ("assistant", "text") => {
            let text = joined_parts(&content.parts);
            Some(Fragment::Assistant(AssistantPart {
                text: Some(resolver.apply(&text)).filter(|t| !t.trim().is_empty()),
                ts,
                ..Default::default()
            }))
        }
        _ => None,
    }
}

/// Consecutive assistant fragments collapse into one message.
fn merge_fragments(fragments: Vec<Fragment>) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut pending: Option<AssistantPart> = None;

    for fragment in fragments {
        match fragment {
            Fragment::User { content, ts } => {
                messages.extend(pending.take().and_then(AssistantPart::into_message));
                messages.push(Message::new(Role::User, content).with_ts(ts));
            }
            Fragment::Assistant(part) => match pending.as_mut() {
                Some(acc) => acc.absorb(part),
                None => pending = Some(part),
            },
        }
    }
    messages.extend(pending.and_then(AssistantPart::into_message));
    messages
}

/// Model and effort from the most recent node that records them.
fn latest_model_meta(mapping: &BTreeMap<String, RawNode>) -> ConversationMeta {
    mapping
        .iter()
        .filter_map(|(id, node)| {
            let message = node.message.as_ref()?;
            let model = message.metadata.model();
            let effort = message.metadata.thinking_effort.clone().filter(|e| !e.is_empty());
            if model.is_none() && effort.is_none() {
                return None;
            }
            Some(((message.create_time.or(message.update_time), id), model, effort))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, model_slug, thinking_effort)| ConversationMeta {
            model_slug,
            thinking_effort,
            ..Default::default()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::models::SourceKind;

    fn node(parent: Option<&str>, children: &[&str], message: Value) -> Value {
        json!({"parent": parent, "children": children, "message": message})
    }

    fn text_message(role: &str, text: &str, time: f64) -> Value {
        json!({
            "author": {"role": role},
            "content": {"content_type": "text", "parts": [text]},
            "create_time": time,
            "metadata": {}
        })
    }

    fn write(root: &Path, relative: &str, value: &Value) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    fn simple_conversation(title: &str, user: &str, assistant: &str) -> Value {
        json!({
            "title": title,
            "create_time": 1700000000.0,
            "update_time": 1700000500.0,
            "current_node": "n2",
            "mapping": {
                "root": node(None, &["n1"], Value::Null),
                "n1": node(Some("root"), &["n2"], text_message("user", user, 1700000001.0)),
                "n2": node(Some("n1"), &[], text_message("assistant", assistant, 1700000002.0)),
            }
        })
    }

    fn source(dir: &TempDir) -> Source {
        Source::new("gpt", SourceKind::Chatgpt, dir.path())
    }

    #[test]
    fn test_split_file_name() {
        assert_eq!(
            split_file_name(Path::new("Trip_plans_abc123.json")),
            ("Trip_plans".to_string(), "abc123".to_string())
        );
        assert_eq!(split_file_name(Path::new("plain.json")), ("plain".to_string(), "plain".to_string()));
        assert_eq!(split_file_name(Path::new("_x.json")), ("_x".to_string(), "_x".to_string()));
    }

    #[test]
    fn test_list_categories_and_skips_malformed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Quick_q1.json", &simple_conversation("Quick question", "hi", "hello"));
        write(dir.path(), "Work/Trip_t1.json", &simple_conversation("Trip", "plan", "sure"));
        fs::write(dir.path().join("broken_b1.json"), b"{not json").unwrap();
        write(dir.path(), "notes_n1.json", &json!({"title": "not a conversation"}));
        write(dir.path(), ".hidden/Secret_s1.json", &simple_conversation("S", "a", "b"));

        let adapter = ChatgptAdapter::new();
        let listing = adapter.list(&source(&dir)).unwrap();
        assert_eq!(listing.skipped, 2);
        assert_eq!(listing.summaries.len(), 2);

        let work = listing.summaries.iter().find(|s| s.id == "t1").unwrap();
        assert_eq!(work.category, "Work");
        assert_eq!(work.title, "Trip");
        assert_eq!(work.updated_at.unwrap().timestamp(), 1700000500);
        let quick = listing.summaries.iter().find(|s| s.id == "q1").unwrap();
        assert_eq!(quick.category, ROOT_CATEGORY);
        assert_eq!(quick.source_id, "gpt");
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "A_same.json", &simple_conversation("A", "x", "y"));
        write(dir.path(), "B_same.json", &simple_conversation("B", "x", "y"));

        let listing = ChatgptAdapter::new().list(&source(&dir)).unwrap();
        assert_eq!(listing.summaries.len(), 1);
        assert_eq!(listing.summaries[0].title, "A");
        assert_eq!(listing.skipped, 0);
    }

    #[test]
    fn test_hydrate_follows_current_node() {
        let dir = TempDir::new().unwrap();
        let value = json!({
            "title": "Branches",
            "current_node": "b2",
            "mapping": {
                "root": node(None, &["u"], Value::Null),
                "u": node(Some("root"), &["a1", "a2"], text_message("user", "question", 1.0e9)),
                "a1": node(Some("u"), &[], text_message("assistant", "first draft", 1.0e9 + 1.0)),
                "a2": node(Some("u"), &["b2"], text_message("assistant", "regenerated", 1.0e9 + 2.0)),
                "b2": node(Some("a2"), &[], text_message("user", "thanks", 1.0e9 + 3.0)),
            }
        });
        write(dir.path(), "Branches_br.json", &value);

        let adapter = ChatgptAdapter::new();
        let conversation = adapter.hydrate(&source(&dir), ROOT_CATEGORY, "br").unwrap();
        let contents: Vec<&str> = conversation.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "regenerated", "thanks"]);
    }

    #[test]
    fn test_hydrate_without_current_node_takes_first_children() {
        let dir = TempDir::new().unwrap();
        let mut value = simple_conversation("Legacy", "ping", "pong");
        value.as_object_mut().unwrap().remove("current_node");
        write(dir.path(), "Legacy_lg.json", &value);

        let conversation = ChatgptAdapter::new().hydrate(&source(&dir), ROOT_CATEGORY, "lg").unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[1].content, "pong");
    }

    #[test]
    fn test_assistant_fragments_merge() {
        let dir = TempDir::new().unwrap();
        let value = json!({
            "title": "Reasoning",
            "current_node": "t2",
            "mapping": {
                "root": node(None, &["sys"], Value::Null),
                "sys": node(Some("root"), &["u"], json!({
                    "author": {"role": "system"},
                    "content": {"content_type": "text", "parts": ["hidden prompt"]},
                    "metadata": {"is_visually_hidden_from_conversation": true}
                })),
                "u": node(Some("sys"), &["th"], text_message("user", "why?", 10.0)),
                "th": node(Some("u"), &["rc"], json!({
                    "author": {"role": "assistant"},
                    "content": {"content_type": "thoughts", "thoughts": [
                        {"summary": "Considering", "content": "step one"}
                    ]},
                    "create_time": 11.0,
                    "metadata": {"model_slug": "gpt-5", "thinking_effort": "high"}
                })),
                "rc": node(Some("th"), &["t1"], json!({
                    "author": {"role": "assistant"},
                    "content": {"content_type": "reasoning_recap", "content": "Thought for 3s"},
                    "create_time": 12.0,
                    "metadata": {}
                })),
                "t1": node(Some("rc"), &["t2"], text_message("assistant", "Because.", 13.0)),
                "t2": node(Some("t1"), &[], text_message("assistant", "Also this.", 14.0)),
            }
        });
        write(dir.path(), "Reasoning_rs.json", &value);

        let conversation = ChatgptAdapter::new().hydrate(&source(&dir), ROOT_CATEGORY, "rs").unwrap();
        assert_eq!(conversation.messages.len(), 2);
        let answer = &conversation.messages[1];
        assert_eq!(answer.content, "Because.\n\nAlso this.");
        assert_eq!(answer.thinking.len(), 1);
        assert_eq!(answer.thinking[0].summary.as_deref(), Some("Considering"));
        assert_eq!(answer.thinking_summary.as_deref(), Some("Thought for 3s"));
        assert_eq!(answer.ts.unwrap().timestamp(), 14);
        assert_eq!(conversation.meta.model_slug.as_deref(), Some("gpt-5"));
        assert_eq!(conversation.meta.thinking_effort.as_deref(), Some("high"));
    }

    #[test]
    fn test_citation_markers_become_pills() {
        let dir = TempDir::new().unwrap();
        let marker = "\u{E200}cite\u{E202}turn0search0\u{E201}";
        let mut answer = text_message("assistant", &format!("Rust is fast.{marker}"), 2.0);
        answer["metadata"] = json!({"content_references": [{
            "matched_text": marker,
            "type": "grouped_webpages",
            "items": [{"title": "Rust", "url": "https://www.rust-lang.org/"}]
        }]});
        let value = json!({
            "title": "Cited",
            "current_node": "a",
            "mapping": {
                "u": node(None, &["a"], text_message("user", "tell me", 1.0)),
                "a": node(Some("u"), &[], answer),
            }
        });
        write(dir.path(), "Cited_ct.json", &value);

        let conversation = ChatgptAdapter::new().hydrate(&source(&dir), ROOT_CATEGORY, "ct").unwrap();
        let content = &conversation.messages[1].content;
        assert!(content.starts_with("Rust is fast.[rust-lang](<https://www.rust-lang.org/>"));
        assert!(content.contains("citepayload:"));
        assert!(!content.contains('\u{E200}'));
    }

    #[test]
    fn test_hydrate_cached_until_file_changes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Cache_c1.json", &simple_conversation("Cache", "one", "two"));
        let adapter = ChatgptAdapter::new();
        let src = source(&dir);

        let first = adapter.hydrate(&src, ROOT_CATEGORY, "c1").unwrap();
        let second = adapter.hydrate(&src, ROOT_CATEGORY, "c1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        write(dir.path(), "Cache_c1.json", &simple_conversation("Cache", "one", "a longer answer"));
        let third = adapter.hydrate(&src, ROOT_CATEGORY, "c1").unwrap();
        assert_eq!(third.messages[1].content, "a longer answer");
    }

    #[test]
    fn test_hydrate_cache_evicts_least_recent() {
        let dir = TempDir::new().unwrap();
        let count = HYDRATED_CACHE_CAPACITY.get() + 1;
        for i in 0..count {
            write(dir.path(), &format!("Chat_c{i}.json"), &simple_conversation("Chat", "q", "a"));
        }
        let adapter = ChatgptAdapter::new();
        let src = source(&dir);

        let oldest = adapter.hydrate(&src, ROOT_CATEGORY, "c0").unwrap();
        let kept = adapter.hydrate(&src, ROOT_CATEGORY, "c1").unwrap();
        for i in 2..count {
            adapter.hydrate(&src, ROOT_CATEGORY, &format!("c{i}")).unwrap();
            // Keep c1 recently used while the rest of the tree streams through
            adapter.hydrate(&src, ROOT_CATEGORY, "c1").unwrap();
        }

        assert!(Arc::ptr_eq(&kept, &adapter.hydrate(&src, ROOT_CATEGORY, "c1").unwrap()));
        assert!(!Arc::ptr_eq(&oldest, &adapter.hydrate(&src, ROOT_CATEGORY, "c0").unwrap()));
    }

    #[test]
    fn test_gemini_capture_listed_and_hydrated() {
        let dir = TempDir::new().unwrap();
        let inner = json!([[[
            ["c_0123456789", "r_abcdef0123"],
            null,
            [["What does Pin guarantee?"]],
            [[["rc_abcdef0123", ["A pinned value never moves again in memory."]]]],
            [1_769_940_000, 0],
        ]]]);
        let outer = json!([["wrb.fr", "hNvQHb", inner.to_string(), null, null, null, "generic"]]).to_string();
        let capture = json!({
            "batchexecute_raw": format!(")]}}'\n\n{}\n{outer}\n", outer.len()),
            "conversation_id": "c_0123456789",
            "fetched_at": "2026-02-01T10:00:00Z",
            "title": "Pinning",
        });
        write(dir.path(), "Gemini/Pinning_c_0123456789.json", &capture);
        write(dir.path(), "Gemini/Orphan_o1.json", &json!({"batchexecute_raw": ")]}'"}));

        let adapter = ChatgptAdapter::new();
        let listing = adapter.list(&source(&dir)).unwrap();
        assert_eq!(listing.summaries.len(), 1);
        assert_eq!(listing.skipped, 1);
        let summary = &listing.summaries[0];
        assert_eq!((summary.category.as_str(), summary.id.as_str()), ("Gemini", "0123456789"));
        assert_eq!(summary.title, "Pinning");
        assert_eq!(summary.updated_at.unwrap().to_rfc3339(), "2026-02-01T10:00:00+00:00");

        let conversation = adapter.hydrate(&source(&dir), "Gemini", "0123456789").unwrap();
        assert_eq!(conversation.meta.model_slug.as_deref(), Some("gemini"));
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[0].content, "What does Pin guarantee?");
        assert_eq!(conversation.messages[1].content, "A pinned value never moves again in memory.");
    }

    #[test]
    fn test_hydrate_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = ChatgptAdapter::new().hydrate(&source(&dir), ROOT_CATEGORY, "missing").unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[test]
    fn test_fingerprint_tracks_file_set() {
        let dir = TempDir::new().unwrap();
        let adapter = ChatgptAdapter::new();
        let src = source(&dir);
        let empty = adapter.fingerprint(&src);
        write(dir.path(), "New_n1.json", &simple_conversation("New", "a", "b"));
        let one = adapter.fingerprint(&src);
        assert_ne!(empty.hash, one.hash);
        assert_eq!(one.files, 1);
        assert_eq!(one, adapter.fingerprint(&src));
    }
}
