//! Format adapters: one variant per export layout, all behind `list` / `hydrate`.
//!
//! - [`chatgpt`] - one JSON file per conversation, including [`batchexecute`] web captures
//! - [`claude`] - a single aggregate `conversations.json`
//! - [`gemini`] - a Takeout activity page
//!
//! The variant is chosen once per source, from its configured kind or by
//! [`detect`](crate::detector::detect). Supporting a new layout means adding a variant here.

pub mod batchexecute;
pub mod cache;
pub mod chatgpt;
pub mod claude;
pub mod deserializers;
pub mod gemini;
pub mod html;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

pub use cache::{FileStamp, SourceFingerprint};
pub use chatgpt::ChatgptAdapter;
pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;

use crate::detector::detect;
use crate::error::{ArchiveError, Result};
use crate::models::{Conversation, ConversationSummary, Source, Vendor};

/// Upper bound for single-file exports (aggregate JSON, activity HTML).
pub const MAX_EXPORT_BYTES: u64 = 1024 * 1024 * 1024;

/// Summaries produced by one adapter pass, unsorted.
#[derive(Debug, Clone, Default)]
pub struct AdapterListing {
    pub summaries: Vec<ConversationSummary>,
    /// Records that could not be parsed and were left out.
    pub skipped: usize,
}

#[derive(Debug)]
pub enum Adapter {
    Chatgpt(ChatgptAdapter),
    Claude(ClaudeAdapter),
    Gemini(GeminiAdapter),
    /// The root could not be classified; lists nothing.
    Unrecognized,
}

impl Adapter {
    pub fn for_vendor(vendor: Vendor) -> Self {
        match vendor {
            Vendor::Chatgpt => Adapter::Chatgpt(ChatgptAdapter::new()),
            Vendor::Claude => Adapter::Claude(ClaudeAdapter::new()),
            Vendor::Gemini => Adapter::Gemini(GeminiAdapter::new()),
        }
    }

    /// Adapter for `source`: its explicit kind, or whatever detection finds at the root.
    pub fn for_source(source: &Source) -> Self {
        match source.kind.vendor().or_else(|| detect(&source.root_path)) {
            Some(vendor) => {
                debug!(source = %source.id, vendor = %vendor, "selected adapter");
                Self::for_vendor(vendor)
            }
            None => {
                debug!(source = %source.id, root = %source.root_path.display(), "unrecognized source root");
                Adapter::Unrecognized
            }
        }
    }

    pub fn vendor(&self) -> Option<Vendor> {
        match self {
            Adapter::Chatgpt(_) => Some(Vendor::Chatgpt),
            Adapter::Claude(_) => Some(Vendor::Claude),
            Adapter::Gemini(_) => Some(Vendor::Gemini),
            Adapter::Unrecognized => None,
        }
    }

    pub fn list(&self, source: &Source) -> Result<AdapterListing> {
        match self {
            Adapter::Chatgpt(adapter) => adapter.list(source),
            Adapter::Claude(adapter) => adapter.list(source),
            Adapter::Gemini(adapter) => adapter.list(source),
            Adapter::Unrecognized => Ok(AdapterListing::default()),
        }
    }

    pub fn hydrate(&self, source: &Source, category: &str, id: &str) -> Result<Arc<Conversation>> {
        match self {
            Adapter::Chatgpt(adapter) => adapter.hydrate(source, category, id),
            Adapter::Claude(adapter) => adapter.hydrate(source, category, id),
            Adapter::Gemini(adapter) => adapter.hydrate(source, category, id),
            Adapter::Unrecognized => Err(ArchiveError::NotFound(format!(
                "conversation {category}/{id} in source {}",
                source.id
            ))),
        }
    }

    /// Stat-only fingerprint of everything `list` would read.
    pub fn fingerprint(&self, source: &Source) -> SourceFingerprint {
        match self {
            Adapter::Chatgpt(adapter) => adapter.fingerprint(source),
            Adapter::Claude(adapter) => adapter.fingerprint(source),
            Adapter::Gemini(adapter) => adapter.fingerprint(source),
            Adapter::Unrecognized => cache::FingerprintBuilder::new().finish(),
        }
    }
}

pub(crate) fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(ArchiveError::config(format!("source root {} is not a reachable directory", root.display())))
    }
}
