//! Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tempfile::TempDir;

/// Deterministic UUID for test record `n`.
pub fn test_uuid(n: u32) -> String {
    format!("00000000-0000-4000-8000-{:012}", n)
}

/// Builder for per-file exports: one JSON document per conversation.
pub struct ChatgptExportBuilder {
    temp_dir: TempDir,
}

impl ChatgptExportBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Add a conversation as `<category>/<title>_<id>.json`; `None` places it in the root.
    /// Messages are `(role, text)` pairs chained parent to child.
    pub fn with_conversation(
        self,
        category: Option<&str>,
        id: &str,
        title: &str,
        messages: &[(&str, &str)],
    ) -> Self {
        let doc = conversation_document(title, 1_700_000_000.0, messages);
        let file_title = title.replace(' ', "_");
        self.with_raw_file(category, &format!("{}_{}.json", file_title, id), &doc.to_string())
    }

    /// Add a file with arbitrary content.
    pub fn with_raw_file(self, category: Option<&str>, name: &str, content: &str) -> Self {
        let dir = match category {
            Some(category) => self.temp_dir.path().join(category),
            None => self.temp_dir.path().to_path_buf(),
        };
        fs::create_dir_all(&dir).expect("Failed to create category dir");
        fs::write(dir.join(name), content).expect("Failed to write conversation file");
        self
    }

    pub fn build(self) -> TempDir {
        self.temp_dir
    }
}

/// Conversation JSON with a linear message chain and `current_node` at the last message.
pub fn conversation_document(title: &str, update_time: f64, messages: &[(&str, &str)]) -> Value {
    let mut mapping = serde_json::Map::new();
    mapping.insert(
        "root".to_string(),
        json!({"parent": null, "children": if messages.is_empty() { json!([]) } else { json!(["m0"]) }, "message": null}),
    );
    for (i, (role, text)) in messages.iter().enumerate() {
        let parent = if i == 0 { "root".to_string() } else { format!("m{}", i - 1) };
        let children = if i + 1 < messages.len() { json!([format!("m{}", i + 1)]) } else { json!([]) };
        mapping.insert(
            format!("m{}", i),
            json!({
                "parent": parent,
                "children": children,
                "message": {
                    "author": {"role": role},
                    "create_time": update_time - 100.0 + i as f64,
                    "content": {"content_type": "text", "parts": [text]}
                }
            }),
        );
    }
    let current = if messages.is_empty() { "root".to_string() } else { format!("m{}", messages.len() - 1) };
    json!({
        "title": title,
        "create_time": update_time - 100.0,
        "update_time": update_time,
        "mapping": mapping,
        "current_node": current
    })
}

/// Gemini web capture wrapping a raw `batchexecute` response. Turns are
/// `(prompt, answer, epoch seconds)`, oldest first; the payload stores them newest first.
pub fn gemini_capture_document(title: &str, turns: &[(&str, &str, i64)]) -> Value {
    let raw_turns: Vec<Value> = turns
        .iter()
        .rev()
        .enumerate()
        .map(|(i, (prompt, answer, ts))| {
            json!([
                ["c_0000000001", format!("r_{:010}", i)],
                null,
                [[prompt]],
                [[[format!("rc_{:010}", i), [answer]]]],
                [ts, 0]
            ])
        })
        .collect();
    let inner = json!([raw_turns]);
    let outer = json!([["wrb.fr", "hNvQHb", inner.to_string(), null, null, null, "generic"]]).to_string();
    json!({
        "batchexecute_raw": format!(")]}}'\n\n{}\n{}\n", outer.len(), outer),
        "conversation_id": "c_0000000001",
        "fetched_at": "2026-02-01T10:00:00Z",
        "title": title
    })
}

/// Builder for aggregate exports: a single `conversations.json` array.
pub struct ClaudeExportBuilder {
    temp_dir: TempDir,
    records: Vec<Value>,
}

impl ClaudeExportBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let builder = Self { temp_dir, records: Vec::new() };
        builder.write();
        builder
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Add a conversation; messages are `(sender, text)` pairs.
    pub fn with_conversation(self, uuid: &str, name: &str, messages: &[(&str, &str)]) -> Self {
        let chat_messages: Vec<Value> = messages
            .iter()
            .map(|(sender, text)| {
                json!({
                    "sender": sender,
                    "text": text,
                    "content": [{"type": "text", "text": text}],
                    "created_at": "2024-05-01T10:00:00Z"
                })
            })
            .collect();
        self.with_raw_record(json!({
            "uuid": uuid,
            "name": name,
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-02T10:00:00Z",
            "chat_messages": chat_messages
        }))
    }

    /// Add a record verbatim, e.g. one that should fail to parse.
    pub fn with_raw_record(mut self, record: Value) -> Self {
        self.records.push(record);
        self.write();
        self
    }

    pub fn with_projects(self, projects: Value) -> Self {
        fs::write(self.temp_dir.path().join("projects.json"), projects.to_string())
            .expect("Failed to write projects.json");
        self
    }

    pub fn with_memories(self, memories: Value) -> Self {
        fs::write(self.temp_dir.path().join("memories.json"), memories.to_string())
            .expect("Failed to write memories.json");
        self
    }

    fn write(&self) {
        fs::write(
            self.temp_dir.path().join("conversations.json"),
            Value::Array(self.records.clone()).to_string(),
        )
        .expect("Failed to write conversations.json");
    }

    pub fn build(self) -> TempDir {
        self.temp_dir
    }
}

pub const GEMINI_ACTIVITY_DIR: &str = "Takeout/My Activity/Gemini Apps";

/// Builder for Takeout activity exports.
pub struct GeminiExportBuilder {
    temp_dir: TempDir,
    cells: Vec<String>,
}

impl GeminiExportBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(temp_dir.path().join(GEMINI_ACTIVITY_DIR))
            .expect("Failed to create activity dir");
        let builder = Self { temp_dir, cells: Vec::new() };
        builder.write();
        builder
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn activity_dir(&self) -> PathBuf {
        self.temp_dir.path().join(GEMINI_ACTIVITY_DIR)
    }

    /// Add one prompt/response entry. `extra` is raw HTML placed before the timestamp,
    /// e.g. attachment links.
    pub fn with_entry(mut self, prompt: &str, response_html: &str, label: &str, extra: &str) -> Self {
        let body = format!("Prompted {prompt}<br>{extra}{label}<br>{response_html}");
        self.cells.push(format!(
            "<div class=\"outer-cell mdl-cell\"><div class=\"mdl-grid\"><div class=\"header-cell\"><p class=\"mdl-typography--title\">Gemini Apps<br></p></div><div class=\"content-cell mdl-cell mdl-typography--body-1\">{body}</div><div class=\"content-cell mdl-typography--caption\">Products: Gemini Apps</div></div></div>"
        ));
        self.write();
        self
    }

    /// Place a file next to the activity page.
    pub fn with_attachment(self, name: &str, bytes: &[u8]) -> Self {
        fs::write(self.activity_dir().join(name), bytes).expect("Failed to write attachment");
        self
    }

    fn write(&self) {
        let html = format!(
            "<html><body><div class=\"mdl-grid\">{}</div></body></html>",
            self.cells.concat()
        );
        fs::write(self.activity_dir().join("MyActivity.html"), html)
            .expect("Failed to write MyActivity.html");
    }

    pub fn build(self) -> TempDir {
        self.temp_dir
    }
}
