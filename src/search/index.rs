//! Inverted index over normalized conversations, segmented per source.
//!
//! A [`Segment`] is immutable once built. A [`SearchIndex`] is just the list of segments that
//! were published together, so swapping in a new index never touches live postings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use super::snippet::{make_snippet, snippet_source};
use super::tokenizer::{TokenKind, is_cjk, tokenize};
use crate::adapters::SourceFingerprint;
use crate::models::{SearchHit, SearchScope};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;
/// Latin query tokens at least this long fall back to prefix matching.
const PREFIX_MIN_CHARS: usize = 3;
const TITLE_ALL_BOOST: u32 = 100;
const TITLE_TOKEN_BOOST: u32 = 10;

/// Normalized text of one conversation, ready to index.
#[derive(Debug, Clone)]
pub struct DocumentText {
    pub category: String,
    pub id: String,
    pub title: String,
    pub body: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IndexedDoc {
    pub category: String,
    pub id: String,
    pub title: String,
    pub updated_at: Option<DateTime<Utc>>,
    snippet_source: String,
    title_tokens: HashSet<String>,
}

/// All documents of one source plus their postings.
#[derive(Debug)]
pub struct Segment {
    pub source_id: String,
    pub fingerprint: SourceFingerprint,
    docs: Vec<IndexedDoc>,
    postings: BTreeMap<String, Vec<u32>>,
}

impl Segment {
    /// Documents that produce no tokens at all are left out.
    pub fn build(source_id: &str, fingerprint: SourceFingerprint, documents: Vec<DocumentText>) -> Self {
        let tokenized: Vec<(IndexedDoc, HashSet<String>)> = documents
            .into_par_iter()
            .filter_map(|doc| {
                let title_tokens: HashSet<String> =
                    tokenize(&doc.title).into_iter().map(|t| t.text).collect();
                let mut tokens: HashSet<String> =
                    tokenize(&doc.body).into_iter().map(|t| t.text).collect();
                tokens.extend(title_tokens.iter().cloned());
                if tokens.is_empty() {
                    return None;
                }
                let indexed = IndexedDoc {
                    snippet_source: snippet_source(&doc.title, &doc.body),
                    category: doc.category,
                    id: doc.id,
                    title: doc.title,
                    updated_at: doc.updated_at,
                    title_tokens,
                };
                Some((indexed, tokens))
            })
            .collect();

        let mut docs = Vec::with_capacity(tokenized.len());
        let mut postings: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for (doc_index, (doc, tokens)) in tokenized.into_iter().enumerate() {
            for token in tokens {
                postings.entry(token).or_default().push(doc_index as u32);
            }
            docs.push(doc);
        }
        Self { source_id: source_id.to_string(), fingerprint, docs, postings }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn docs(&self) -> &[IndexedDoc] {
        &self.docs
    }

    fn matcher(&self, term: &QueryTerm) -> Matcher {
        match term.kind {
            TokenKind::Char => term.text.chars().next().map_or(Matcher::Exact(String::new()), Matcher::CjkChar),
            TokenKind::Word
                if !self.postings.contains_key(&term.text)
                    && term.text.chars().count() >= PREFIX_MIN_CHARS
                    && !term.text.chars().any(is_cjk) =>
            {
                Matcher::Prefix(term.text.clone())
            }
            _ => Matcher::Exact(term.text.clone()),
        }
    }

    /// Sorted, deduplicated document indices matching `matcher`.
    fn lookup(&self, matcher: &Matcher) -> Vec<u32> {
        let mut hits: Vec<u32> = match matcher {
            Matcher::Exact(text) => return self.postings.get(text).cloned().unwrap_or_default(),
            Matcher::Prefix(prefix) => self
                .postings
                .range(prefix.clone()..)
                .take_while(|(token, _)| token.starts_with(prefix.as_str()))
                .flat_map(|(_, docs)| docs.iter().copied())
                .collect(),
            Matcher::CjkChar(_) => self
                .postings
                .iter()
                .filter(|(token, _)| matcher.matches(token))
                .flat_map(|(_, docs)| docs.iter().copied())
                .collect(),
        };
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    fn query(&self, terms: &QueryTerms) -> Vec<SearchHit> {
        if terms.required.is_empty() {
            return Vec::new();
        }
        let required: Vec<Matcher> = terms.required.iter().map(|t| self.matcher(t)).collect();

        let mut candidates: Option<Vec<u32>> = None;
        for matcher in &required {
            let hits = self.lookup(matcher);
            candidates = Some(match candidates {
                None => hits,
                Some(current) => intersect(&current, &hits),
            });
            if candidates.as_ref().is_some_and(Vec::is_empty) {
                return Vec::new();
            }
        }

        let optional: Vec<(Matcher, Vec<u32>)> = terms
            .optional
            .iter()
            .map(|t| {
                let matcher = self.matcher(t);
                let hits = self.lookup(&matcher);
                (matcher, hits)
            })
            .collect();
        let needles: Vec<String> = required
            .iter()
            .chain(optional.iter().map(|(m, _)| m))
            .map(Matcher::needle)
            .filter(|n| !n.is_empty())
            .collect();
        let needles: Vec<&str> = needles.iter().map(String::as_str).collect();

        candidates
            .unwrap_or_default()
            .into_iter()
            .map(|doc_index| {
                let doc = &self.docs[doc_index as usize];
                let in_title = required
                    .iter()
                    .filter(|m| doc.title_tokens.iter().any(|t| m.matches(t)))
                    .count() as u32;
                let boosts = optional.iter().filter(|(_, hits)| hits.binary_search(&doc_index).is_ok()).count()
                    as u32;
                let mut score = in_title * TITLE_TOKEN_BOOST + required.len() as u32 + boosts;
                if in_title as usize == required.len() {
                    score += TITLE_ALL_BOOST;
                }
                let (snippet, highlights) = make_snippet(&doc.snippet_source, &needles);
                SearchHit {
                    id: doc.id.clone(),
                    category: doc.category.clone(),
                    source: self.source_id.clone(),
                    title: doc.title.clone(),
                    snippet,
                    highlights,
                    score,
                    updated_at: doc.updated_at,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Exact(String),
    Prefix(String),
    /// A single CJK character: itself or any bigram containing it.
    CjkChar(char),
}

impl Matcher {
    fn matches(&self, token: &str) -> bool {
        match self {
            Matcher::Exact(text) => token == text,
            Matcher::Prefix(prefix) => token.starts_with(prefix.as_str()),
            Matcher::CjkChar(c) => {
                let mut chars = token.chars();
                match (chars.next(), chars.next(), chars.next()) {
                    (Some(a), None, _) => a == *c,
                    (Some(a), Some(b), None) => a == *c || b == *c,
                    _ => false,
                }
            }
        }
    }

    /// Text to highlight in snippets.
    fn needle(&self) -> String {
        match self {
            Matcher::Exact(text) | Matcher::Prefix(text) => text.clone(),
            Matcher::CjkChar(c) => c.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryTerm {
    text: String,
    kind: TokenKind,
}

/// A query split the way documents were indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTerms {
    required: Vec<QueryTerm>,
    optional: Vec<QueryTerm>,
}

impl QueryTerms {
    /// Words, bigrams and single characters are required; whole CJK runs only boost.
    pub fn parse(query: &str) -> Self {
        let mut terms = Self::default();
        let mut seen = HashSet::new();
        for token in tokenize(query) {
            if !seen.insert(token.text.clone()) {
                continue;
            }
            let term = QueryTerm { text: token.text, kind: token.kind };
            match term.kind {
                TokenKind::Run => terms.optional.push(term),
                _ => terms.required.push(term),
            }
        }
        terms
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }
}

/// Published set of segments.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    segments: Vec<Arc<Segment>>,
}

impl SearchIndex {
    pub fn new(segments: Vec<Arc<Segment>>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn segment(&self, source_id: &str) -> Option<&Arc<Segment>> {
        self.segments.iter().find(|s| s.source_id == source_id)
    }

    /// Documents visible to `scope`.
    pub fn doc_count(&self, scope: &SearchScope) -> usize {
        self.segments.iter().filter(|s| scope.includes(&s.source_id)).map(|s| s.len()).sum()
    }

    /// Ranked hits for `query`, at most `limit` (clamped to [`MAX_LIMIT`]).
    pub fn query(&self, query: &str, scope: &SearchScope, limit: usize) -> Vec<SearchHit> {
        let terms = QueryTerms::parse(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .segments
            .iter()
            .filter(|s| scope.includes(&s.source_id))
            .flat_map(|s| s.query(&terms))
            .collect();
        hits.sort_by(rank);
        hits.truncate(limit.clamp(1, MAX_LIMIT));
        hits
    }
}

fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.id.cmp(&b.id))
}

fn intersect(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
