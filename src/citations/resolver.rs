//! Marker-to-reference resolution.
//!
//! A [`CitationResolver`] is compiled once per message from the vendor's reference table and
//! then rewrites message text: every recognized marker becomes a citation pill, or vanishes
//! when nothing in the table backs it. Output depends only on the text and the table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

use serde::Deserialize;
use serde_json::Value;

use crate::adapters::deserializers::null_as_default;

use super::markers::{
    BracketKey, MarkerEncoding, find_markers, normalize_marker_key, parse_bracket_marker,
};
use super::payload::{CitationPayload, CitationRef, canonical_url, clean_title, host_label, normalize_url};

/// Most links kept behind a single marker.
pub const MAX_REFS_PER_MARKER: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReferenceItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub supporting_websites: Vec<ReferenceItem>,
}

/// One row of a vendor reference table, keyed by the marker text it annotates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReferenceEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub matched_text: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<ReferenceItem>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub safe_urls: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cloud_doc_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input_pointer: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub invalid: bool,
}

impl ReferenceEntry {
    fn line_range(&self) -> (Option<u64>, Option<u64>) {
        let read = |key: &str| {
            let value = self.input_pointer.as_ref()?.get(key)?;
            value.as_u64().or_else(|| value.as_str()?.trim().parse().ok())
        };
        (read("line_range_start"), read("line_range_end"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Refs(Vec<CitationRef>),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCitation {
    pub encoding: MarkerEncoding,
    /// Byte range of the marker in the input text.
    pub marker: Range<usize>,
    /// `None` when the marker had nothing behind it and was removed.
    pub payload: Option<CitationPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    pub citations: Vec<ResolvedCitation>,
}

#[derive(Debug, Clone, Default)]
pub struct CitationResolver {
    exact: HashMap<String, Resolution>,
    normalized: HashMap<String, Resolution>,
    bracketed: HashMap<BracketKey, Resolution>,
}

impl CitationResolver {
    /// Resolver with no reference table: every marker is stripped.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(entries: &[ReferenceEntry]) -> Self {
        let mut resolver = Self::default();
        for entry in entries {
            let matched = entry.matched_text.trim();
            if matched.is_empty() {
                continue;
            }
            let Some(resolution) = classify(entry) else {
                continue;
            };
            if let Some(marker) = parse_bracket_marker(matched) {
                resolver.bracketed.insert(marker.key, resolution.clone());
            }
            resolver.normalized.insert(normalize_marker_key(matched), resolution.clone());
            resolver.exact.insert(entry.matched_text.clone(), resolution);
        }
        resolver
    }

    /// Entries from a raw JSON array; rows that do not fit the shape are ignored.
    pub fn from_json(references: Option<&Value>) -> Self {
        let Some(Value::Array(rows)) = references else {
            return Self::empty();
        };
        let entries: Vec<ReferenceEntry> =
            rows.iter().filter_map(|row| serde_json::from_value(row.clone()).ok()).collect();
        Self::new(&entries)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.bracketed.is_empty()
    }

    fn lookup(&self, encoding: MarkerEncoding, marker: &str) -> Option<&Resolution> {
        self.exact
            .get(marker)
            .or_else(|| self.normalized.get(&normalize_marker_key(marker)))
            .or_else(|| {
                if encoding != MarkerEncoding::Bracketed {
                    return None;
                }
                self.bracketed.get(&parse_bracket_marker(marker)?.key)
            })
    }

    pub fn resolve(&self, text: &str) -> ResolvedText {
        let markers = find_markers(text);
        if markers.is_empty() {
            return ResolvedText { text: text.to_string(), citations: Vec::new() };
        }

        let mut out = String::with_capacity(text.len());
        let mut citations = Vec::with_capacity(markers.len());
        let mut last_end = 0;
        for marker in markers {
            out.push_str(&text[last_end..marker.range.start]);
            let payload = match self.lookup(marker.encoding, marker.text(text)) {
                Some(Resolution::Refs(refs)) if !refs.is_empty() => {
                    Some(CitationPayload::new(refs.clone()))
                }
                _ => None,
            };
            if let Some(payload) = &payload {
                out.push_str(&payload.render_pill());
            }
            last_end = marker.range.end;
            citations.push(ResolvedCitation {
                encoding: marker.encoding,
                marker: marker.range,
                payload,
            });
        }
        out.push_str(&text[last_end..]);
        ResolvedText { text: out, citations }
    }

    /// Rewritten text only.
    pub fn apply(&self, text: &str) -> String {
        self.resolve(text).text
    }
}

fn classify(entry: &ReferenceEntry) -> Option<Resolution> {
    let matched = entry.matched_text.trim();
    let lower = matched.to_lowercase();
    let bracket = parse_bracket_marker(matched);

    // Message-chunk citations pointing into tool output: `【3:5†notes.md†L1-L9】`
    if let Some(marker) = &bracket
        && let Some(chunk) = marker.key.chunk
    {
        let label = marker.label.clone().unwrap_or_default();
        let host = bracket_tag(&label).unwrap_or_else(|| "file".to_string());
        let base = if label.is_empty() { format!("ref {}:{}", marker.key.index, chunk) } else { label };
        let title = format!("{} (L{}-L{})", base, marker.key.line_start, marker.key.line_end);
        return Some(Resolution::Refs(vec![CitationRef::host_only(&host, Some(&title))]));
    }

    if entry.kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case("file")) || lower.contains("filecite")
    {
        return Some(Resolution::Refs(vec![file_ref(entry)]));
    }

    if lower.contains("cite") {
        let links = web_links(entry);
        if !links.is_empty() {
            return Some(Resolution::Refs(links));
        }
        let title = entry.items.iter().find_map(|i| i.title.as_deref().or(i.attribution.as_deref()));
        let host = entry.attribution.as_deref().unwrap_or("ref");
        return Some(Resolution::Refs(vec![CitationRef::host_only(host, title)]));
    }

    // Deep-research line-range citations: `【4†L10-L20】`
    let marker = bracket?;
    let lines = format!("(L{}-L{})", marker.key.line_start, marker.key.line_end);
    match entry.url.as_deref().and_then(normalize_url) {
        Some(url) => {
            let attribution = entry.attribution.clone().unwrap_or_else(|| host_label(&url));
            let title = entry.title.clone().unwrap_or_else(|| host_label(&url));
            let mut reference = CitationRef::web(&url, None);
            reference.title = Some(clean_title(&format!("{}: {} {}", attribution, title, lines)));
            Some(Resolution::Refs(vec![reference]))
        }
        None if entry.invalid => Some(Resolution::Remove),
        None => {
            let host = entry.attribution.as_deref().unwrap_or("ref");
            let title = entry.title.as_deref().map(|t| format!("{} {}", t, lines));
            Some(Resolution::Refs(vec![CitationRef::host_only(host, title.as_deref())]))
        }
    }
}

fn file_ref(entry: &ReferenceEntry) -> CitationRef {
    let name = entry.name.as_deref().map(str::trim).filter(|n| !n.is_empty()).unwrap_or("file");
    let title = match entry.line_range() {
        (Some(start), Some(end)) => format!("{} (L{}-L{})", name, start, end),
        (Some(start), None) => format!("{} (L{})", name, start),
        _ => name.to_string(),
    };
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty());
    let host = extension.unwrap_or_else(|| "file".to_string());
    let url = entry.cloud_doc_url.as_deref().or(entry.url.as_deref()).and_then(normalize_url);

    CitationRef { url, title: Some(clean_title(&title)), host: Some(host) }
}

fn web_links(entry: &ReferenceEntry) -> Vec<CitationRef> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |url: Option<String>, title: Option<&str>| {
        let Some(url) = url else { return };
        if links.len() >= MAX_REFS_PER_MARKER || !seen.insert(canonical_url(&url)) {
            return;
        }
        links.push(CitationRef::web(&url, title));
    };

    for item in &entry.items {
        let title = item.title.as_deref().or(item.attribution.as_deref());
        add(item.url.as_deref().and_then(normalize_url), title);
        for site in &item.supporting_websites {
            let title = site.title.as_deref().or(site.attribution.as_deref());
            add(site.url.as_deref().and_then(normalize_url), title);
        }
    }
    for url in &entry.safe_urls {
        add(normalize_url(url), None);
    }
    links
}

fn bracket_tag(label: &str) -> Option<String> {
    let start = label.find('[')?;
    let rest = &label[start + 1..];
    let end = rest.find(']')?;
    let tag = &rest[..end];
    let valid = !tag.is_empty()
        && tag.len() <= 40
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    valid.then(|| tag.to_string())
}

/// A reference attached to a character span of the text (character offsets, end exclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanCitation {
    pub start: usize,
    pub end: usize,
    pub reference: CitationRef,
}

/// Inserts one pill after each annotated span. Spans sharing the same range are merged
/// into one pill; references with a repeated URL are dropped; out-of-range spans are
/// ignored.
pub fn materialize_spans(text: &str, spans: &[SpanCitation]) -> String {
    if text.trim().is_empty() || spans.is_empty() {
        return text.to_string();
    }
    let char_count = text.chars().count();
    let mut groups: BTreeMap<(usize, usize), Vec<CitationRef>> = BTreeMap::new();
    for span in spans {
        if span.start > span.end || span.end > char_count {
            continue;
        }
        let refs = groups.entry((span.start, span.end)).or_default();
        let duplicate = span.reference.url.is_some()
            && refs.iter().any(|r| r.url == span.reference.url);
        if !duplicate && refs.len() < MAX_REFS_PER_MARKER {
            refs.push(span.reference.clone());
        }
    }

    // Insert back to front so earlier byte offsets stay valid.
    let mut insertions: Vec<((usize, usize), Vec<CitationRef>)> = groups.into_iter().collect();
    insertions.sort_by(|a, b| b.0.1.cmp(&a.0.1).then_with(|| b.0.0.cmp(&a.0.0)));

    let mut out = text.to_string();
    for ((_, end), refs) in insertions {
        let offset = text.char_indices().nth(end).map(|(i, _)| i).unwrap_or(text.len());
        let pill = CitationPayload::new(refs).render_pill();
        out.insert_str(offset, &format!(" {}", pill));
    }
    out
}
