//! Typed citation payloads and their display-boundary encoding.
//!
//! Internally a citation is a [`CitationPayload`]. Only when text leaves the core is it
//! rendered as a Markdown link whose title attribute carries
//! `citepayload:<base64url JSON>`, the format the presentation layer expects.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const PAYLOAD_PREFIX: &str = "citepayload:";

const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "yclid", "mc_cid", "mc_eid"];

static PILL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[([^\]\n]*)\]\(<([^>\n]*)> "citepayload:([A-Za-z0-9_-]*)"\)"#)
        .expect("pill pattern is valid")
});

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid base64 in citation payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid citation payload JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One reference behind a citation marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CitationRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl CitationRef {
    /// Reference to a web page; the host label is derived from the URL.
    pub fn web(url: &str, title: Option<&str>) -> Self {
        Self {
            url: Some(url.to_string()),
            title: title.map(clean_title).filter(|t| !t.is_empty()),
            host: Some(host_label(url)),
        }
    }

    /// Reference without a usable URL.
    pub fn host_only(host: &str, title: Option<&str>) -> Self {
        let host = host.trim();
        Self {
            url: None,
            title: title.map(clean_title).filter(|t| !t.is_empty()),
            host: Some(if host.is_empty() { "ref".to_string() } else { host.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationPayload {
    pub refs: Vec<CitationRef>,
}

impl CitationPayload {
    pub fn new(refs: Vec<CitationRef>) -> Self {
        Self { refs }
    }

    /// Base64url (no padding) of the compact JSON form.
    pub fn encode(&self) -> String {
        // Serializing plain strings and options cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a token produced by [`CitationPayload::encode`], with or without the
    /// `citepayload:` prefix. Padded input is tolerated.
    pub fn decode(token: &str) -> Result<Self, PayloadError> {
        let token = token.trim();
        let token = token.strip_prefix(PAYLOAD_PREFIX).unwrap_or(token).trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD.decode(token)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Visible pill label: the first host, with `+N` for additional refs.
    pub fn label(&self) -> String {
        let base = self
            .refs
            .first()
            .and_then(|r| r.host.as_deref())
            .filter(|h| !h.is_empty())
            .unwrap_or("ref");
        match self.refs.len() {
            0 | 1 => base.to_string(),
            n => format!("{} +{}", base, n - 1),
        }
    }

    pub fn href(&self) -> String {
        self.refs
            .first()
            .and_then(|r| r.url.as_deref())
            .filter(|u| !u.is_empty())
            .map(|u| u.replace('<', "%3C").replace('>', "%3E").replace(' ', "%20"))
            .unwrap_or_else(|| "#".to_string())
    }

    /// Markdown link carrying the payload in its title attribute.
    pub fn render_pill(&self) -> String {
        let label = self.label().replace(['[', ']'], "");
        format!("[{}](<{}> \"{}{}\")", label, self.href(), PAYLOAD_PREFIX, self.encode())
    }
}

/// Every payload rendered into `text`, in reading order. Pills whose payload fails to
/// decode are skipped.
pub fn extract_pills(text: &str) -> Vec<CitationPayload> {
    PILL_PATTERN
        .captures_iter(text)
        .filter_map(|caps| CitationPayload::decode(caps.get(3)?.as_str()).ok())
        .collect()
}

/// Short source label for a URL: the second-to-last domain label, `www.` stripped.
pub fn host_label(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let parts: Vec<&str> = host.split('.').filter(|p| !p.is_empty()).collect();
    match parts.len() {
        0 => "ref".to_string(),
        1 => parts[0].to_string(),
        n => parts[n - 2].to_string(),
    }
}

/// Makes vendor URLs absolute: protocol-relative and scheme-less URLs become https.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    if let Some(rest) = url.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    match Url::parse(url) {
        Ok(parsed) if parsed.has_host() || parsed.scheme() == "mailto" => Some(url.to_string()),
        _ => Some(format!("https://{}", url.trim_start_matches('/'))),
    }
}

/// Canonical form used to deduplicate references: tracking parameters and the fragment
/// are dropped.
pub fn canonical_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    parsed.set_fragment(None);
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

/// Single-line title, double quotes swapped for single, at most 80 characters.
pub fn clean_title(title: &str) -> String {
    title.replace(['\n', '\r'], " ").replace('"', "'").trim().chars().take(80).collect()
}
