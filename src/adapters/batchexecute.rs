//! Gemini web captures: per-file JSON documents that wrap a raw `batchexecute` response.
//!
//! The payload is a nested array without field names, so extraction is heuristic. Turns
//! sit under `inner[0]`, the prompt under `turn[2]` and the answer under `turn[3]`, tagged
//! with an `rc_` id. Captures live beside regular per-file conversations and are listed by
//! the same adapter.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, anyhow};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::deserializers::{epoch_seconds, null_as_default, parse_rfc3339};
use crate::models::{Conversation, ConversationMeta, Message, Role, ThinkingStep};

const XSSI_PREFIX: &str = ")]}'";
const DEFAULT_MODEL: &str = "gemini";
const THINKING_TITLE: &str = "Thinking";
const IMAGE_PLACEHOLDER: &str = "[image not included in the export]";
const MIN_THINKING_SCORE: i64 = 60;
const MIN_THINKING_CHARS: usize = 120;
const MIN_CANDIDATE_CHARS: usize = 20;

static FRAME_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\d+\n\[\[").expect("frame pattern is valid"));
static ID_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:c|r|rc)_[A-Za-z0-9_-]{6,}$").expect("id pattern is valid"));
static BASE64ISH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=_-]{80,}$").expect("blob pattern is valid"));
static IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^image_[0-9a-fA-F]{4,}\.(?:png|jpe?g|gif|webp|bmp|tiff?)$").expect("image name pattern is valid")
});
static IMAGE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bimage/(?:png|jpe?g|gif|webp|bmp|tiff?)\b|https?://(?:lh3\.)?googleusercontent\.com/")
        .expect("image hint pattern is valid")
});
// Only explicit labels, headers and tags count; "thinking" in prose does not
static THINKING_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)</?think>",
        r"|(?:^|\n)\s*(?:thinking|thoughts?)\s*[:：]",
        r"|(?:^|\n)\s*#+\s*(?:thinking|thoughts?)\s*(?:$|\n)",
        r"|(?:^|\n)\s*(?:思考过程|推理过程|思考)\s*[:：]",
        r"|(?:^|\n)\s*#+\s*(?:思考过程|推理过程|思考)\s*(?:$|\n)",
    ))
    .expect("thinking hint pattern is valid")
});
static THINKING_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(investigating|analyzing|examining|unpacking|pinpointing|tracing|isolating|",
        r"verifying|assessing|understanding|reframing|refining|constructing|formulating|",
        r"diagnosing|evaluating|dissecting|connecting the dots|unveiling)\b",
    ))
    .expect("thinking style pattern is valid")
});
static THINKING_NARRATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(i\s*(?:am|'m)\s*(?:now|currently|about\s+to|going\s+to)\b|my\s+(?:focus|plan|strategy|goal)\b)")
        .expect("narration pattern is valid")
});

/// Wrapper document written by the web capture tool.
#[derive(Debug, Deserialize)]
pub struct RawCapture {
    batchexecute_raw: String,
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    fetched_at: Option<String>,
}

/// True for a capture wrapper: a raw payload plus a conversation id or fetch time.
pub fn is_capture(doc: &Value) -> bool {
    doc.get("batchexecute_raw").is_some_and(Value::is_string)
        && (doc.get("conversation_id").is_some_and(Value::is_string)
            || doc.get("fetched_at").is_some_and(Value::is_string))
}

struct Turn {
    prompt: String,
    response: String,
    thinking: Option<String>,
    ts: Option<f64>,
}

/// Normalizes one capture. A wrapper whose envelope carries no payload becomes a single
/// assistant notice listing the error codes instead of failing.
pub fn build_conversation(id: &str, fallback_title: &str, capture: &RawCapture) -> anyhow::Result<Conversation> {
    let fetched_at = capture.fetched_at.as_deref().and_then(parse_rfc3339);
    let title = capture.title.trim();
    let meta = ConversationMeta {
        model_slug: Some(
            capture.model.as_deref().filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL).to_string(),
        ),
        updated_at: fetched_at,
        ..ConversationMeta::default()
    };
    let title = if title.is_empty() { fallback_title.to_string() } else { title.to_string() };

    let outer = first_outer_array(&capture.batchexecute_raw)
        .ok_or_else(|| anyhow!("batchexecute capture has no outer chunk"))?;
    let inner = outer
        .first()
        .and_then(Value::as_array)
        .and_then(|envelope| envelope.get(2))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let Some(inner) = inner else {
        let mut codes = Vec::new();
        for item in &outer {
            error_codes(item, &mut codes);
        }
        let mut notice = String::from("Gemini capture is missing its conversation payload; the fetch may have failed or been denied");
        if !codes.is_empty() {
            notice.push_str(&format!(" (error codes: {})", codes.join(", ")));
        }
        return Ok(Conversation {
            id: id.to_string(),
            title,
            meta,
            messages: vec![Message::new(Role::Assistant, notice).with_ts(fetched_at)],
        });
    };

    let inner: Value = serde_json::from_str(inner).context("batchexecute inner payload is not JSON")?;
    let mut messages = Vec::new();
    for turn in parse_turns(&inner) {
        let ts = turn.ts.and_then(epoch_seconds);
        if !turn.prompt.is_empty() {
            messages.push(Message::new(Role::User, turn.prompt).with_ts(ts));
        }
        if !turn.response.is_empty() || turn.thinking.is_some() {
            let mut message = Message::new(Role::Assistant, turn.response).with_ts(ts);
            if let Some(thinking) = turn.thinking {
                message.thinking.push(ThinkingStep {
                    title: Some(THINKING_TITLE.to_string()),
                    ..ThinkingStep::new(thinking)
                });
            }
            messages.push(message);
        }
    }
    Ok(Conversation { id: id.to_string(), title, meta, messages })
}

/// First length-framed JSON array of a response, after the XSSI guard line.
fn first_outer_array(raw: &str) -> Option<Vec<Value>> {
    let body = match raw.strip_prefix(XSSI_PREFIX) {
        Some(rest) => rest.split_once('\n').map_or("", |(_, after)| after),
        None => raw,
    };
    let body = body.trim_start();
    let digits = body.len() - body.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let mut rest = &body[digits..];
    if digits > 0 {
        rest = rest.strip_prefix('\r').unwrap_or(rest);
        rest = rest.strip_prefix('\n').unwrap_or(rest);
    }
    if rest.is_empty() {
        return None;
    }
    // Later frames are telemetry
    let chunk = FRAME_MARKER.find(rest).map_or(rest, |m| &rest[..m.start()]);
    match serde_json::from_str(chunk).ok()? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Numbers following an `"e"` tag, as in `["e", 4, null, null, 140]`.
fn error_codes(value: &Value, codes: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            if items.first().and_then(Value::as_str) == Some("e") {
                for code in items[1..].iter().filter_map(Value::as_f64) {
                    let code = (code as i64).to_string();
                    if !codes.contains(&code) {
                        codes.push(code);
                    }
                }
            }
            items.iter().for_each(|item| error_codes(item, codes));
        }
        Value::Object(map) => map.values().for_each(|item| error_codes(item, codes)),
        _ => {}
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

fn parse_turns(inner: &Value) -> Vec<Turn> {
    let Some(raw_turns) = inner.get(0).and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut turns: Vec<Turn> = raw_turns
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|turn| {
            let prompt = turn_prompt(turn);
            let (response, thinking) = turn_response(turn);
            if prompt.is_empty() && response.is_empty() && thinking.is_none() {
                return None;
            }
            Some(Turn { prompt, response, thinking, ts: turn_timestamp(turn) })
        })
        .collect();

    // Captures are usually newest first; sort only when timestamps actually differ
    let distinct: HashSet<u64> = turns.iter().filter_map(|t| t.ts).map(f64::to_bits).collect();
    if distinct.len() >= 2 {
        turns.sort_by(|a, b| match (a.ts, b.ts) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    } else {
        turns.reverse();
    }
    turns
}

fn or_image_placeholder(prompt: &str) -> String {
    if IMAGE_NAME.is_match(prompt) { IMAGE_PLACEHOLDER.to_string() } else { prompt.to_string() }
}

fn joined_lines(lines: &[Value]) -> String {
    let lines: Vec<&str> = lines.iter().filter_map(Value::as_str).filter(|s| !s.trim().is_empty()).collect();
    lines.join("\n").trim().to_string()
}

fn turn_prompt(turn: &[Value]) -> String {
    let Some(slot) = turn.get(2) else {
        return String::new();
    };
    if let Some(items) = slot.as_array()
        && let Some(first) = items.first()
    {
        match first {
            Value::Array(lines) if !lines.is_empty() && lines.iter().all(Value::is_string) => {
                return or_image_placeholder(&joined_lines(lines));
            }
            _ if items.iter().all(Value::is_string) => return or_image_placeholder(&joined_lines(items)),
            _ => {}
        }
    }

    let mut slot_strings = Vec::new();
    collect_strings(slot, &mut slot_strings);
    let mut turn_strings = Vec::new();
    turn.iter().for_each(|item| collect_strings(item, &mut turn_strings));
    let short = slot_strings.into_iter().chain(turn_strings.iter().copied()).map(str::trim).find(|s| {
        let chars = s.chars().count();
        chars > 1 && chars <= 400 && !s.contains('\n') && !ID_LIKE.is_match(s)
    });
    if let Some(short) = short {
        return or_image_placeholder(short);
    }

    // Image-only prompts whose image the export left out
    if turn_strings.iter().any(|s| IMAGE_HINT.is_match(s)) {
        return IMAGE_PLACEHOLDER.to_string();
    }
    String::new()
}

fn trim_line_ends(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, '\r' | '\n' | ' '))
}

/// Answers tagged as `["rc_…", ["text", …], …]`.
fn collect_tagged_answers(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            if let [Value::String(tag), Value::Array(payload), ..] = items.as_slice()
                && tag.starts_with("rc_")
            {
                let parts: Vec<&str> = payload
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|p| !p.trim().is_empty())
                    .map(trim_line_ends)
                    .collect();
                if !parts.is_empty() {
                    out.push(parts.join("\n").trim().to_string());
                }
            }
            items.iter().for_each(|item| collect_tagged_answers(item, out));
        }
        Value::Object(map) => map.values().for_each(|item| collect_tagged_answers(item, out)),
        _ => {}
    }
}

fn thinking_score(text: &str) -> i64 {
    let t = text.trim();
    if t.is_empty() {
        return 0;
    }
    let hint = THINKING_HINT.is_match(t);
    let narration = THINKING_NARRATION.is_match(t);
    // Style verbs alone show up in ordinary answers
    if !(hint || narration) {
        return 0;
    }
    let mut score = 0;
    if hint {
        score += 80;
    }
    if THINKING_STYLE.is_match(t) {
        score += 40;
    }
    if narration {
        score += 60;
    }
    if t.starts_with("**") {
        score += 10;
    }
    score += (t.matches("**").count() as i64 * 2).min(30);
    score += (t.matches("\n\n").count() as i64).min(20);
    score
}

fn markdown_bonus(t: &str) -> i64 {
    let mut score = 0;
    if t.contains('\n') {
        score += 80;
    }
    if t.contains("```") {
        score += 120;
    }
    if t.contains('#') || t.contains('*') || t.contains("- ") {
        score += 20;
    }
    score
}

fn final_score(text: &str) -> i64 {
    let t = text.trim();
    if t.is_empty() {
        return i64::MIN;
    }
    let mut score = t.chars().count() as i64 + markdown_bonus(t);
    let lower = t.to_lowercase();
    if lower.contains("googleusercontent.com/deep_research_confirmation_content")
        || lower.contains("googleusercontent.com/immersive_entry_chip")
    {
        score -= 8000;
    }
    if thinking_score(t) >= MIN_THINKING_SCORE {
        score -= 10_000;
    }
    score
}

fn looks_like_report(text: &str) -> bool {
    let t = text.trim_start();
    t.chars().count() >= 4000 && t.starts_with('#') && (t.contains("\n## ") || t.contains("\n### "))
}

/// Highest-scoring item; the earliest one wins ties.
fn best_by<'a, K: Ord>(items: impl IntoIterator<Item = &'a str>, key: impl Fn(&str) -> K) -> Option<&'a str> {
    let mut best: Option<(&str, K)> = None;
    for item in items {
        let score = key(item);
        if best.as_ref().is_none_or(|(_, top)| score > *top) {
            best = Some((item, score));
        }
    }
    best.map(|(item, _)| item)
}

fn pick_best_text<'a>(candidates: impl IntoIterator<Item = &'a str>) -> String {
    let usable = candidates
        .into_iter()
        .map(trim_line_ends)
        .filter(|t| !t.is_empty() && !ID_LIKE.is_match(t) && !BASE64ISH.is_match(t));
    best_by(usable, |t| {
        let mut score = t.chars().count() as i64 + markdown_bonus(t);
        if score < 200 && (t.starts_with("http://") || t.starts_with("https://")) {
            score -= 100;
        }
        score
    })
    .unwrap_or_default()
    .to_string()
}

fn turn_response(turn: &[Value]) -> (String, Option<String>) {
    let Some(slot) = turn.get(3) else {
        return (String::new(), None);
    };
    let mut tagged = Vec::new();
    collect_tagged_answers(slot, &mut tagged);

    let mut raw = Vec::new();
    collect_strings(slot, &mut raw);
    let mut seen = HashSet::new();
    let strings: Vec<&str> = raw.into_iter().map(str::trim).filter(|s| !s.is_empty() && seen.insert(*s)).collect();

    let mut thinking_candidates = Vec::new();
    let mut final_candidates = Vec::new();
    for &s in &strings {
        if ID_LIKE.is_match(s) || BASE64ISH.is_match(s) || s.chars().count() < MIN_CANDIDATE_CHARS {
            continue;
        }
        if thinking_score(s) >= MIN_THINKING_SCORE && s.chars().count() >= MIN_THINKING_CHARS {
            thinking_candidates.push(s);
        } else {
            final_candidates.push(s);
        }
    }

    let tagged: Vec<&str> = tagged.iter().map(String::as_str).filter(|t| !t.trim().is_empty()).collect();
    let reports: Vec<&str> =
        tagged.iter().chain(final_candidates.iter()).copied().filter(|t| looks_like_report(t)).collect();
    let chosen = if !reports.is_empty() {
        best_by(reports, final_score)
    } else if !tagged.is_empty() {
        best_by(tagged, final_score)
    } else {
        best_by(final_candidates, final_score)
    };
    let mut response = chosen.map(|r| r.trim().to_string()).unwrap_or_default();
    if response.is_empty() {
        response = pick_best_text(strings.iter().copied());
    }

    // Thinking that repeats the answer is dropped
    let thinking = best_by(thinking_candidates, |t| (thinking_score(t), t.chars().count()))
        .filter(|t| response.is_empty() || !(t.contains(response.as_str()) || response.contains(*t)))
        .map(str::to_string);
    (response, thinking)
}

/// Epoch seconds of a turn. The shallowest `[seconds, nanos]` pair wins; otherwise the
/// shallowest epoch-like scalar, read as milliseconds when large.
fn turn_timestamp(turn: &[Value]) -> Option<f64> {
    let mut pairs: Vec<(usize, f64, f64)> = Vec::new();
    let mut scalars: Vec<(usize, f64)> = Vec::new();
    for item in turn {
        walk_numbers(item, 1, &mut pairs, &mut scalars);
    }

    let pair = pairs
        .iter()
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)).then(b.2.total_cmp(&a.2)));
    if let Some(&(_, secs, nanos)) = pair {
        return Some(secs + nanos / 1e9);
    }
    let &(_, n) = scalars.iter().min_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)))?;
    Some(if n >= 1e12 { n / 1000.0 } else { n })
}

fn walk_numbers(value: &Value, depth: usize, pairs: &mut Vec<(usize, f64, f64)>, scalars: &mut Vec<(usize, f64)>) {
    match value {
        Value::Number(n) => {
            if let Some(n) = n.as_f64()
                && (1e9..=2e13).contains(&n)
            {
                scalars.push((depth, n));
            }
        }
        Value::Array(items) => {
            if let [Value::Number(a), Value::Number(b)] = items.as_slice()
                && let (Some(secs), Some(nanos)) = (a.as_f64(), b.as_f64())
                && (1e9..=2e10).contains(&secs)
                && (0.0..1e9).contains(&nanos)
            {
                pairs.push((depth, secs, nanos));
            }
            items.iter().for_each(|item| walk_numbers(item, depth + 1, pairs, scalars));
        }
        Value::Object(map) => map.values().for_each(|item| walk_numbers(item, depth + 1, pairs, scalars)),
        _ => {}
    }
}
