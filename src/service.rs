//! Request/response facade consumed by the presentation layer.
//!
//! [`ArchiveService`] ties the persisted source list, the normalized store and the index
//! builder together. Every call returns promptly: index construction happens on the
//! builder's worker and searches report readiness instead of waiting for it.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, import_candidates, validate_sources};
use crate::error::{ArchiveError, Result};
use crate::models::{
    Conversation, ConversationListing, SearchResponse, SearchScope, SearchStats, Source,
};
use crate::search::{DEFAULT_LIMIT, IndexBuilder, IndexState};
use crate::store::NormalizedStore;
use crate::utils::{resolve_within_root, validate_file_size};

/// Largest attachment `get_file` will return.
pub const MAX_ATTACHMENT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug)]
pub struct ArchiveService {
    config: ConfigStore,
    store: Arc<NormalizedStore>,
    builder: IndexBuilder,
    /// Serializes source-set mutations so persistence and the store never disagree.
    mutation: Mutex<()>,
}

impl ArchiveService {
    /// Loads the persisted source list from `config_path`.
    pub fn open(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config = ConfigStore::new(config_path);
        let sources = config.load()?;
        info!(path = %config.path().display(), sources = sources.len(), "opened archive");
        let store = Arc::new(NormalizedStore::new(sources));
        let builder = IndexBuilder::new(Arc::clone(&store))?;
        Ok(Self { config, store, builder, mutation: Mutex::new(()) })
    }

    pub fn config_path(&self) -> &Path {
        self.config.path()
    }

    pub fn list_sources(&self) -> Vec<Source> {
        self.store.sources()
    }

    /// Replaces the source list. Nothing is persisted or applied when validation fails.
    /// An in-flight index build for the old set is superseded.
    pub fn set_sources(&self, sources: Vec<Source>) -> Result<()> {
        validate_sources(&sources)?;
        let _guard = self.mutation.lock();
        self.config.save(&sources)?;
        self.store.set_sources(sources);
        if self.builder.state() != IndexState::Empty {
            self.builder.request_rebuild(self.store.sources());
        }
        Ok(())
    }

    /// Registers every vendor export found at `root` that is not registered yet. Returns the
    /// sources that were added.
    pub fn import_root(&self, root: &Path) -> Result<Vec<Source>> {
        let existing = self.list_sources();
        let added = import_candidates(root, &existing)?;
        if !added.is_empty() {
            let mut sources = existing;
            sources.extend(added.iter().cloned());
            self.set_sources(sources)?;
        }
        Ok(added)
    }

    /// Conversations of one source grouped by category.
    pub fn list_conversations(&self, source_id: &str) -> Result<Arc<ConversationListing>> {
        let outcome = self.store.list(source_id)?;
        if outcome.changed && self.builder.state() != IndexState::Empty {
            debug!(source = source_id, "source changed on disk, reindexing");
            self.builder.request_rebuild(self.store.sources());
        }
        Ok(outcome.listing)
    }

    /// Listing merged over every enabled source.
    ///
    /// A source that cannot be listed is logged and counted once in `skipped`; the
    /// remaining sources still contribute.
    pub fn list_all_conversations(&self) -> Result<ConversationListing> {
        let mut summaries = Vec::new();
        let mut skipped = 0;
        for source in self.list_sources().into_iter().filter(|s| s.enabled) {
            let listing = match self.list_conversations(&source.id) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(source = %source.id, error = %e, "source left out of merged listing");
                    skipped += 1;
                    continue;
                }
            };
            summaries.extend(listing.summaries().cloned());
            skipped += listing.skipped;
        }
        Ok(ConversationListing::from_summaries(summaries, skipped))
    }

    pub fn get_conversation(&self, source_id: &str, category: &str, id: &str) -> Result<Arc<Conversation>> {
        self.store.hydrate(source_id, category, id)
    }

    pub fn search(&self, query: &str, scope: &SearchScope) -> SearchResponse {
        self.search_with_limit(query, scope, DEFAULT_LIMIT)
    }

    /// Runs `query` against the published snapshot. The first search starts the initial
    /// build and answers `ready == false`.
    pub fn search_with_limit(&self, query: &str, scope: &SearchScope, limit: usize) -> SearchResponse {
        let started = Instant::now();
        let snapshot = self.builder.snapshot();
        if snapshot.state == IndexState::Empty {
            self.builder.request_rebuild(self.store.sources());
            return SearchResponse {
                ready: false,
                results: Vec::new(),
                stats: SearchStats { took_ms: started.elapsed().as_millis() as u64, doc_count: 0 },
            };
        }
        let results = snapshot.index.query(query, scope, limit);
        SearchResponse {
            ready: snapshot.state == IndexState::Ready,
            results,
            stats: SearchStats {
                took_ms: started.elapsed().as_millis() as u64,
                doc_count: snapshot.index.doc_count(scope),
            },
        }
    }

    /// Reads a file inside a source root, e.g. an activity attachment.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::PathSecurity`] when `relative_path` escapes the root.
    pub fn get_file(&self, source_id: &str, relative_path: &str) -> Result<Vec<u8>> {
        let source = self.store.source(source_id)?;
        let path = resolve_within_root(&source.root_path, relative_path)?;
        if !fs::metadata(&path)?.is_file() {
            return Err(ArchiveError::NotFound(format!("file {}", relative_path)));
        }
        let mut file = File::open(&path)?;
        validate_file_size(&file, &path, MAX_ATTACHMENT_BYTES)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Requests a rebuild over the current source set.
    pub fn refresh(&self) -> u64 {
        self.builder.request_rebuild(self.store.sources())
    }

    /// Blocks until the current build is published. Starts one if none was requested yet.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        if self.builder.state() == IndexState::Empty {
            self.refresh();
        }
        self.builder.wait_until_ready(timeout)
    }

    pub fn index_state(&self) -> IndexState {
        self.builder.state()
    }
}
