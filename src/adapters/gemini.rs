//! Takeout activity exports: one HTML page listing every prompt and response.
//!
//! Each activity entry becomes its own two-message conversation. Entries carry no stable
//! identifier, so ids are derived from a content hash. Files referenced by an entry are
//! rewritten into links served from the source root instead of being embedded.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::cache::{FileStamp, FingerprintBuilder, SourceFingerprint};
use super::html::html_to_markdown;
use super::{AdapterListing, MAX_EXPORT_BYTES, ensure_root};
use crate::detector::find_activity_file;
use crate::error::{ArchiveError, Result};
use crate::models::{Conversation, ConversationMeta, ConversationSummary, Message, Role, Source};
use crate::utils::{attachment_url, relative_slash_path, validate_file_size};

pub const ACTIVITY_CATEGORY: &str = "All";
const DEFAULT_TITLE: &str = "Gemini Apps";
const TITLE_CHARS: usize = 60;
const ID_HEX_CHARS: usize = 12;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "heic", "svg"];

static OUTER_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.outer-cell").expect("outer cell selector is valid"));
// The first body cell holds prompt, attachments, timestamp and response
static CONTENT_CELL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.content-cell.mdl-typography--body-1").expect("content cell selector is valid")
});
static ATTACHMENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href], img[src]").expect("attachment selector is valid"));
static EN_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<mon>[A-Za-z]{3}) (?P<day>\d{1,2}), (?P<year>\d{4}), (?P<h>\d{1,2}):(?P<mi>\d{2}):(?P<se>\d{2}) ?(?P<ampm>AM|PM) (?P<tz>[A-Za-z]{2,4})$",
    )
    .expect("timestamp pattern is valid")
});
static CN_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<year>\d{4})年(?P<mon>\d{1,2})月(?P<day>\d{1,2})日 ?(?:(?P<ampm>上午|下午) ?)?(?P<h>\d{1,2}):(?P<mi>\d{2}):(?P<se>\d{2}) ?(?P<tz>[A-Za-z]{2,4})$",
    )
    .expect("timestamp pattern is valid")
});
static PROMPTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)Prompted\s*(.*)").expect("prompt pattern is valid"));
static ATTACHED_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bAttached\b|附加了|已附加|附件").expect("attachment pattern is valid"));
static FEEDBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:Gave feedback\s*:|提供了反馈\s*[:：])").expect("feedback pattern is valid")
});
static RESPONSE_NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^Prompted\s+[^\n]*(?:\n|$)",
        r"(?i)^Attached\s+\d+\s+files?\.?\s*",
        r"^附加了\s*\d+\s*个文件\s*\.?\s*",
        r"^(?:-\s*\[[^\]]+\]\([^)]*\)\s*)+",
        r"^\s*[A-Z][a-z]{2} \d{1,2}, \d{4}, \d{1,2}:\d{2}:\d{2}\s*(?:AM|PM)\s*[A-Za-z]{2,4}\s*",
        r"^\s*\d{4}年\d{1,2}月\d{1,2}日\s*(?:上午|下午)?\s*\d{1,2}:\d{2}:\d{2}\s*[A-Za-z]{2,4}\s*",
    ]
    .iter()
    .map(|re| Regex::new(re).expect("response cleanup pattern is valid"))
    .collect()
});

/// One prompt/response pair from the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub id: String,
    pub prompt: String,
    pub response: String,
    pub ts: Option<DateTime<Utc>>,
    /// Paths relative to the source root, `/`-separated.
    pub attachments: Vec<String>,
}

impl ActivityEntry {
    pub fn title(&self) -> String {
        let prompt = collapse_whitespace(&self.prompt);
        if prompt.is_empty() { DEFAULT_TITLE.to_string() } else { prompt.chars().take(TITLE_CHARS).collect() }
    }
}

#[derive(Debug)]
struct ActivityLog {
    path: PathBuf,
    stamp: FileStamp,
    entries: Vec<ActivityEntry>,
    by_id: HashMap<String, usize>,
    skipped: usize,
}

#[derive(Debug, Default)]
pub struct GeminiAdapter {
    log: Mutex<Option<Arc<ActivityLog>>>,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, source: &Source) -> Result<AdapterListing> {
        let log = self.load(&source.root_path)?;
        let summaries = log
            .entries
            .iter()
            .map(|entry| ConversationSummary {
                id: entry.id.clone(),
                title: entry.title(),
                category: ACTIVITY_CATEGORY.to_string(),
                source_id: source.id.clone(),
                updated_at: entry.ts,
            })
            .collect();
        Ok(AdapterListing { summaries, skipped: log.skipped })
    }

    pub fn hydrate(&self, source: &Source, category: &str, id: &str) -> Result<Arc<Conversation>> {
        let log = self.load(&source.root_path)?;
        let entry = (category == ACTIVITY_CATEGORY)
            .then(|| log.by_id.get(id).map(|&index| &log.entries[index]))
            .flatten()
            .ok_or_else(|| {
                ArchiveError::NotFound(format!("conversation {category}/{id} in source {}", source.id))
            })?;
        Ok(Arc::new(entry_conversation(entry, &source.id)))
    }

    pub fn fingerprint(&self, source: &Source) -> SourceFingerprint {
        let root = source.root_path.as_path();
        let mut builder = FingerprintBuilder::new();
        match find_activity_file(root) {
            Some(path) => {
                let key = relative_slash_path(root, &path).unwrap_or_default();
                builder.add(&key, FileStamp::from_path(&path).ok());
            }
            None => builder.add("", None),
        }
        builder.finish()
    }

    fn load(&self, root: &Path) -> Result<Arc<ActivityLog>> {
        ensure_root(root)?;
        let path = find_activity_file(root)
            .ok_or_else(|| ArchiveError::NotFound(format!("no activity file under {}", root.display())))?;
        let stamp = FileStamp::from_path(&path)?;

        if let Some(cached) = self.log.lock().as_ref()
            && cached.path == path
            && cached.stamp == stamp
        {
            return Ok(Arc::clone(cached));
        }

        let mut file = File::open(&path)?;
        validate_file_size(&file, &path, MAX_EXPORT_BYTES)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let html = String::from_utf8_lossy(&bytes);

        let attachment_base = path
            .parent()
            .and_then(|dir| relative_slash_path(root, dir))
            .unwrap_or_default();
        let (entries, skipped) = parse_activity(&html, &attachment_base);
        let by_id = entries.iter().enumerate().map(|(i, e)| (e.id.clone(), i)).collect();
        info!(path = %path.display(), entries = entries.len(), skipped, "loaded activity log");

        let log = Arc::new(ActivityLog { path, stamp, entries, by_id, skipped });
        *self.log.lock() = Some(Arc::clone(&log));
        Ok(log)
    }
}

/// Splits an activity page into entries. Returns the entries and the number of entries
/// that had no recognizable content cell.
pub fn parse_activity(html: &str, attachment_base: &str) -> (Vec<ActivityEntry>, usize) {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();
    let mut used_ids: HashSet<String> = HashSet::new();
    let mut skipped = 0;

    for outer in document.select(&OUTER_CELL) {
        let Some(cell) = outer.select(&CONTENT_CELL).next() else {
            skipped += 1;
            continue;
        };
        if FEEDBACK.is_match(&cell.text().collect::<String>()) {
            continue;
        }

        let label = timestamp_label(cell);
        let inner = cell.inner_html();
        let split = label.and_then(|label| inner.find(label).map(|at| (at, at + label.len())));
        let (prompt, response) = match split {
            Some((start, end)) => (extract_prompt(&inner[..start]), extract_response(&inner[end..])),
            None => (extract_prompt(&inner), extract_response(&inner)),
        };
        let attachments = extract_attachments(outer, attachment_base);
        if prompt.is_empty() && response.is_empty() && attachments.is_empty() {
            debug!("skipping empty activity entry");
            continue;
        }

        let label = label.map(|label| collapse_whitespace(&label.replace('\u{202f}', " ")));
        let seed = format!("{}|{}|{}", label.as_deref().unwrap_or_default(), prompt, response);
        let id = unique_id(content_id(&seed), &mut used_ids);
        let ts = label.as_deref().and_then(parse_timestamp_label);
        entries.push(ActivityEntry { id, prompt, response, ts, attachments });
    }
    (entries, skipped)
}

fn content_id(seed: &str) -> String {
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    digest[..ID_HEX_CHARS].to_string()
}

/// `base`, then `base-2`, `base-3`, ... for repeated content.
fn unique_id(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// The direct text child of the cell that reads as a timestamp.
fn timestamp_label(cell: ElementRef<'_>) -> Option<&str> {
    cell.children()
        .filter_map(|node| node.value().as_text())
        .map(|text| text.trim())
        .find(|text| parse_timestamp_label(text).is_some())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The first line after "Prompted", without the attachment count.
fn extract_prompt(html: &str) -> String {
    let line = html.find("<br").map_or(html, |end| &html[..end]);
    let markdown = html_to_markdown(line);
    let Some(caps) = PROMPTED.captures(&markdown) else {
        return String::new();
    };
    let prompt = caps.get(1).map_or("", |m| m.as_str());
    let prompt = ATTACHED_SUFFIX.find(prompt).map_or(prompt, |m| &prompt[..m.start()]);
    collapse_whitespace(prompt)
}

fn extract_response(html: &str) -> String {
    let mut text = html_to_markdown(html);
    for pattern in RESPONSE_NOISE.iter() {
        text = pattern.replace(&text, "").into_owned();
    }
    text.trim().to_string()
}

/// Local files linked from an entry, relative to the source root and deduplicated.
fn extract_attachments(outer: ElementRef<'_>, base: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    outer
        .select(&ATTACHMENT)
        .filter_map(|element| element.value().attr("href").or_else(|| element.value().attr("src")))
        .filter_map(|target| {
            let target = target.trim();
            let lower = target.to_ascii_lowercase();
            let remote = ["http:", "https:", "data:", "mailto:", "#"].iter().any(|p| lower.starts_with(p));
            if target.is_empty() || remote {
                return None;
            }
            let name = percent_decode_str(target).decode_utf8_lossy().into_owned();
            let relative = if base.is_empty() { name } else { format!("{base}/{name}") };
            seen.insert(relative.clone()).then_some(relative)
        })
        .collect()
}

const MONTHS: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

fn zone_offset_hours(zone: &str) -> i32 {
    match zone.to_ascii_uppercase().as_str() {
        "PST" => -8,
        "PDT" => -7,
        "CST" | "CCT" => 8,
        // UTC, GMT and unknown zones
        _ => 0,
    }
}

/// Parses `Jan 31, 2026, 6:15:01 AM PST` or `2026年1月10日 06:01:02 PST`.
pub fn parse_timestamp_label(label: &str) -> Option<DateTime<Utc>> {
    let label = collapse_whitespace(&label.replace('\u{202f}', " "));
    let (caps, month) = if let Some(caps) = EN_TIME.captures(&label) {
        let month = MONTHS.iter().position(|m| m.eq_ignore_ascii_case(&caps["mon"]))? as u32 + 1;
        (caps, month)
    } else {
        let caps = CN_TIME.captures(&label)?;
        let month = caps["mon"].parse().ok()?;
        (caps, month)
    };

    let mut hour: u32 = caps["h"].parse().ok()?;
    match caps.name("ampm").map(|m| m.as_str()) {
        Some("PM" | "下午") if hour != 12 => hour += 12,
        Some("AM" | "上午") if hour == 12 => hour = 0,
        _ => {}
    }
    let date = NaiveDate::from_ymd_opt(caps["year"].parse().ok()?, month, caps["day"].parse().ok()?)?;
    let naive = date.and_hms_opt(hour, caps["mi"].parse().ok()?, caps["se"].parse().ok()?)?;
    let offset = FixedOffset::east_opt(zone_offset_hours(&caps["tz"]) * 3600)?;
    Some(offset.from_local_datetime(&naive).single()?.with_timezone(&Utc))
}

fn attachment_markdown(source_id: &str, relative: &str) -> String {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    let url = attachment_url(source_id, relative);
    let is_image = name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if is_image { format!("![{name}]({url})") } else { format!("- [{name}]({url})") }
}

fn entry_conversation(entry: &ActivityEntry, source_id: &str) -> Conversation {
    let mut prompt = entry.prompt.clone();
    if !entry.attachments.is_empty() {
        let links: Vec<String> =
            entry.attachments.iter().map(|rel| attachment_markdown(source_id, rel)).collect();
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str(&links.join("\n"));
    }

    Conversation {
        id: entry.id.clone(),
        title: entry.title(),
        meta: ConversationMeta {
            model_slug: Some(DEFAULT_TITLE.to_string()),
            thinking_effort: None,
            created_at: entry.ts,
            updated_at: entry.ts,
        },
        messages: vec![
            Message::new(Role::User, prompt).with_ts(entry.ts),
            Message::new(Role::Assistant, entry.response.clone()).with_ts(entry.ts),
        ],
    }
}
