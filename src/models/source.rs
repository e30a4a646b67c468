use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Vendor export layouts the adapters understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// One JSON file per conversation, grouped into category folders.
    Chatgpt,
    /// A single aggregate `conversations.json`.
    Claude,
    /// A Takeout activity log.
    Gemini,
}

impl Vendor {
    pub fn as_str(self) -> &'static str {
        match self {
            Vendor::Chatgpt => "chatgpt",
            Vendor::Claude => "claude",
            Vendor::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured kind of a source. `Auto` defers to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Auto,
    Chatgpt,
    Claude,
    Gemini,
}

impl SourceKind {
    /// The vendor pinned by configuration, if any.
    pub fn vendor(self) -> Option<Vendor> {
        match self {
            SourceKind::Auto => None,
            SourceKind::Chatgpt => Some(Vendor::Chatgpt),
            SourceKind::Claude => Some(Vendor::Claude),
            SourceKind::Gemini => Some(Vendor::Gemini),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Auto => "auto",
            SourceKind::Chatgpt => "chatgpt",
            SourceKind::Claude => "claude",
            SourceKind::Gemini => "gemini",
        }
    }
}

impl From<Vendor> for SourceKind {
    fn from(vendor: Vendor) -> Self {
        match vendor {
            Vendor::Chatgpt => SourceKind::Chatgpt,
            Vendor::Claude => SourceKind::Claude,
            Vendor::Gemini => SourceKind::Gemini,
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(SourceKind::Auto),
            "chatgpt" => Ok(SourceKind::Chatgpt),
            "claude" => Ok(SourceKind::Claude),
            "gemini" => Ok(SourceKind::Gemini),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered vendor export root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub kind: SourceKind,
    pub root_path: PathBuf,
    #[serde(default = "default_enabled", deserialize_with = "deserialize_flag")]
    pub enabled: bool,
    /// Newest backing-file mtime seen by the last scan. Runtime only, never persisted.
    #[serde(skip)]
    pub last_scanned_mtime: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(id: impl Into<String>, kind: SourceKind, root_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind,
            root_path: root_path.into(),
            enabled: true,
            last_scanned_mtime: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Accepts JSON booleans, numbers, and the usual truthy/falsy strings.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(true),
        Value::Number(n) => Ok(n.as_i64().is_some_and(|v| v != 0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Ok(true),
            "0" | "false" | "no" | "n" | "off" => Ok(false),
            other => Err(Error::custom(format!("invalid enabled flag '{}'", other))),
        },
        _ => Err(Error::custom("enabled must be a boolean or string")),
    }
}
