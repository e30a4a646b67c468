//! Citation marker recognition.
//!
//! Three encodings show up in exported message text, checked in this priority order when
//! they could start at the same position:
//!
//! 1. sentinel form: private-use characters `U+E200 kind U+E202 ... U+E201`
//! 2. textual form: `⸢cite⸣turn0search3⸣`, `citeturn0search3`, `fileciteturn2file5L1-L9`,
//!    optionally wrapped in `[...]:` or `【...】`
//! 3. bracketed numeric form: `【4†L10-L20】`, `[4+L10-L20]`, `【3:5†notes.md†L1-L9】`

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<sentinel>\x{E200}[a-z_]+\x{E202}[^\x{E200}\x{E201}]*\x{E201})",
        r"|(?P<textual>",
        r"\[⸢cite⸣(?:turn\d+[a-z]+\d+⸣)+\]:?",
        r"|⸢cite⸣(?:turn\d+[a-z]+\d+⸣)+",
        r"|【[^】\n]*?(?:file)?cite(?:turn\d+[a-z]+\d+)+[^】\n]*?】",
        r"|filecite(?:turn\d+file\d+)(?:L\d{1,6}-L\d{1,6})?",
        r"|cite(?:turn\d+[a-z]+\d+)+",
        r")",
        r"|(?P<bracketed>[【\[]\s*\d{1,4}\s*(?::\s*\d{1,4}\s*)?[†+][^】\]\n]*?L\s*\d{1,6}\s*[-–—]\s*L\s*\d{1,6}\s*[】\]])",
    ))
    .expect("marker pattern is valid")
});

static BRACKET_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[【\[]\s*(\d{1,4})\s*(?::\s*(\d{1,4})\s*)?[†+]\s*(?:([^†+】\]\n]*?)\s*[†+]\s*)?L\s*(\d{1,6})\s*[-–—]\s*L\s*(\d{1,6})\s*[】\]]$",
    )
    .expect("bracket key pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerEncoding {
    Sentinel,
    Textual,
    Bracketed,
}

/// A recognized marker: its encoding and byte range in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMarker {
    pub encoding: MarkerEncoding,
    pub range: Range<usize>,
}

impl CitationMarker {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range.clone()]
    }
}

/// Index of a bracketed numeric marker, e.g. `【4†L10-L20】` or `【3:5†notes†L1-L9】`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BracketKey {
    pub index: u32,
    pub chunk: Option<u32>,
    pub line_start: u32,
    pub line_end: u32,
}

/// Parsed bracketed marker: its key plus the optional inline label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketMarker {
    pub key: BracketKey,
    pub label: Option<String>,
}

/// All markers in `text`, in order of appearance.
pub fn find_markers(text: &str) -> Vec<CitationMarker> {
    MARKER_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let (encoding, m) = if let Some(m) = caps.name("sentinel") {
                (MarkerEncoding::Sentinel, m)
            } else if let Some(m) = caps.name("textual") {
                (MarkerEncoding::Textual, m)
            } else {
                (MarkerEncoding::Bracketed, caps.name("bracketed")?)
            };
            Some(CitationMarker { encoding, range: m.range() })
        })
        .collect()
}

/// Parses a bracketed numeric marker. Returns `None` for any other text.
pub fn parse_bracket_marker(text: &str) -> Option<BracketMarker> {
    let caps = BRACKET_KEY_PATTERN.captures(text.trim())?;
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    Some(BracketMarker {
        key: BracketKey {
            index: number(1)?,
            chunk: number(2),
            line_start: number(4)?,
            line_end: number(5)?,
        },
        label: caps.get(3).map(|m| m.as_str().trim().to_string()).filter(|s| !s.is_empty()),
    })
}

/// Strips wrapping brackets and leading prose so slightly different spellings of the same
/// marker map to one lookup key.
pub fn normalize_marker_key(text: &str) -> String {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix('[') {
        s = rest;
        s = s.strip_suffix(':').unwrap_or(s);
        s = s.strip_suffix(']').unwrap_or(s);
    }
    s = s.strip_prefix('【').unwrap_or(s);
    s = s.strip_suffix('】').unwrap_or(s);

    let lower = s.to_lowercase();
    let cut = lower.find("filecite").or_else(|| lower.find("cite"));
    if let Some(idx) = cut
        && idx > 0
        && s.is_char_boundary(idx)
        && lower.len() == s.len()
    {
        s = &s[idx..];
    }
    s.trim().to_string()
}
