//! Result snippets: a short window of document text around the first match.

use crate::models::Highlight;

/// Characters kept on each side of the earliest match.
pub const SNIPPET_RADIUS: usize = 60;
const ELLIPSIS: &str = "…";

/// Text a snippet is cut from: title and body with whitespace runs collapsed.
pub fn snippet_source(title: &str, body: &str) -> String {
    let title = collapse_whitespace(title);
    let body = collapse_whitespace(body);
    match (title.is_empty(), body.is_empty()) {
        (_, true) => title,
        (true, false) => body,
        (false, false) => format!("{title}\n{body}"),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts a window around the earliest case-insensitive occurrence of any needle and marks
/// every occurrence inside it. Needles must already be lowercase.
pub fn make_snippet(source: &str, needles: &[&str]) -> (String, Vec<Highlight>) {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    // Full lowercase mapping, as the tokenizer does; `owner` maps each folded char back
    // to the source char it came from
    let mut folded: Vec<char> = Vec::with_capacity(chars.len());
    let mut owner: Vec<usize> = Vec::with_capacity(chars.len());
    for (i, &(_, c)) in chars.iter().enumerate() {
        for lower in c.to_lowercase() {
            folded.push(lower);
            owner.push(i);
        }
    }

    let mut matches: Vec<(usize, usize)> = Vec::new();
    for needle in needles {
        let needle: Vec<char> = needle.chars().collect();
        if needle.is_empty() || needle.len() > folded.len() {
            continue;
        }
        for start in 0..=folded.len() - needle.len() {
            if folded[start..start + needle.len()] == needle[..] {
                matches.push((owner[start], owner[start + needle.len() - 1] + 1));
            }
        }
    }

    let Some(&(first_start, first_end)) = matches.iter().min() else {
        let end = chars.len().min(SNIPPET_RADIUS * 2);
        let mut snippet = slice(source, &chars, 0, end);
        if end < chars.len() {
            snippet.push_str(ELLIPSIS);
        }
        return (snippet, Vec::new());
    };

    let from = first_start.saturating_sub(SNIPPET_RADIUS);
    let to = chars.len().min(first_end + SNIPPET_RADIUS);
    let lead = if from > 0 { ELLIPSIS } else { "" };
    let mut snippet = format!("{lead}{}", slice(source, &chars, from, to));
    if to < chars.len() {
        snippet.push_str(ELLIPSIS);
    }

    let base = chars[from].0;
    let byte_at = |i: usize| if i < chars.len() { chars[i].0 } else { source.len() };
    let mut ranges: Vec<(usize, usize)> = matches
        .into_iter()
        .filter(|&(start, end)| start >= from && end <= to)
        .map(|(start, end)| (lead.len() + byte_at(start) - base, lead.len() + byte_at(end) - base))
        .collect();
    ranges.sort_unstable();

    let mut highlights: Vec<Highlight> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match highlights.last_mut() {
            Some(last) if start <= last.end => last.end = last.end.max(end),
            _ => highlights.push(Highlight { start, end }),
        }
    }
    (snippet, highlights)
}

fn slice(source: &str, chars: &[(usize, char)], from: usize, to: usize) -> String {
    let start = chars.get(from).map_or(source.len(), |&(b, _)| b);
    let end = chars.get(to).map_or(source.len(), |&(b, _)| b);
    source[start..end].to_string()
}
