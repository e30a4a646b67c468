//! Normalized store: the per-source listing cache sitting between adapters and callers.
//!
//! Each registered source keeps its adapter (chosen once) and the last listing together with
//! the fingerprint it was built from. A listing is recomputed only when the fingerprint of the
//! backing files moves. Adapter I/O always runs outside the store lock.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::adapters::{Adapter, SourceFingerprint};
use crate::error::{ArchiveError, Result};
use crate::models::{Conversation, ConversationListing, Source};

#[derive(Debug, Clone)]
struct CachedListing {
    fingerprint: SourceFingerprint,
    listing: Arc<ConversationListing>,
}

#[derive(Debug)]
struct StoreEntry {
    source: Source,
    adapter: Arc<Adapter>,
    cached: Option<CachedListing>,
}

impl StoreEntry {
    fn new(source: Source) -> Self {
        let adapter = Arc::new(Adapter::for_source(&source));
        Self { source, adapter, cached: None }
    }
}

/// Listing of one source plus what it was derived from.
#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub listing: Arc<ConversationListing>,
    pub fingerprint: SourceFingerprint,
    /// True when this call had to re-list because the backing files moved.
    pub changed: bool,
}

#[derive(Debug, Default)]
pub struct NormalizedStore {
    entries: Mutex<Vec<StoreEntry>>,
}

impl NormalizedStore {
    pub fn new(sources: Vec<Source>) -> Self {
        let store = Self::default();
        store.set_sources(sources);
        store
    }

    /// Replaces the source set, keeping adapters and listings of sources whose root and
    /// kind did not change.
    pub fn set_sources(&self, sources: Vec<Source>) {
        let mut entries = self.entries.lock();
        let mut previous: Vec<StoreEntry> = std::mem::take(&mut *entries);
        for source in sources {
            let reused = previous.iter().position(|e| {
                e.source.id == source.id
                    && e.source.root_path == source.root_path
                    && e.source.kind == source.kind
            });
            let entry = match reused {
                Some(index) => {
                    let mut entry = previous.swap_remove(index);
                    entry.source.enabled = source.enabled;
                    entry
                }
                None => StoreEntry::new(source),
            };
            entries.push(entry);
        }
        debug!(sources = entries.len(), dropped = previous.len(), "source set updated");
    }

    /// Registered sources in configuration order.
    pub fn sources(&self) -> Vec<Source> {
        self.entries.lock().iter().map(|e| e.source.clone()).collect()
    }

    pub fn source(&self, id: &str) -> Result<Source> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.source.id == id)
            .map(|e| e.source.clone())
            .ok_or_else(|| unknown_source(id))
    }

    /// Lists one source. Disabled sources list as empty.
    pub fn list(&self, id: &str) -> Result<ListOutcome> {
        let (source, adapter, cached) = self.lookup(id)?;
        if !source.enabled {
            return Ok(ListOutcome {
                listing: Arc::new(ConversationListing::default()),
                fingerprint: adapter.fingerprint(&source),
                changed: false,
            });
        }

        let fingerprint = adapter.fingerprint(&source);
        if let Some(cached) = &cached
            && cached.fingerprint == fingerprint
        {
            return Ok(ListOutcome {
                listing: Arc::clone(&cached.listing),
                fingerprint,
                changed: false,
            });
        }

        let raw = adapter.list(&source)?;
        let listing = Arc::new(ConversationListing::from_summaries(raw.summaries, raw.skipped));
        info!(
            source = %source.id,
            conversations = listing.len(),
            skipped = listing.skipped,
            "scanned source"
        );

        let mut entries = self.entries.lock();
        // The source may have been replaced while the lock was released
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.source.id == source.id && Arc::ptr_eq(&e.adapter, &adapter))
        {
            entry.cached =
                Some(CachedListing { fingerprint, listing: Arc::clone(&listing) });
            entry.source.last_scanned_mtime = fingerprint.newest_mtime;
        }
        Ok(ListOutcome { listing, fingerprint, changed: true })
    }

    pub fn hydrate(&self, id: &str, category: &str, conversation_id: &str) -> Result<Arc<Conversation>> {
        let (source, adapter, _) = self.lookup(id)?;
        if !source.enabled {
            return Err(ArchiveError::NotFound(format!("source {} is disabled", source.id)));
        }
        adapter.hydrate(&source, category, conversation_id)
    }

    fn lookup(&self, id: &str) -> Result<(Source, Arc<Adapter>, Option<CachedListing>)> {
        let entries = self.entries.lock();
        let entry = entries.iter().find(|e| e.source.id == id).ok_or_else(|| unknown_source(id))?;
        Ok((entry.source.clone(), Arc::clone(&entry.adapter), entry.cached.clone()))
    }
}

fn unknown_source(id: &str) -> ArchiveError {
    ArchiveError::NotFound(format!("source {}", id))
}
