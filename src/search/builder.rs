//! Background index construction with supersession.
//!
//! One worker thread per builder. Every rebuild request bumps a generation counter; the
//! worker always jumps to the newest queued request and abandons a build as soon as it
//! notices a newer generation. Publication is a pointer swap of an immutable [`Snapshot`]
//! guarded by the generation check, so a superseded build can never publish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::index::{DocumentText, SearchIndex, Segment};
use crate::error::Result;
use crate::models::Source;
use crate::store::NormalizedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// No build has been requested yet.
    Empty,
    Building,
    Ready,
}

/// Immutable view handed to queries.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub state: IndexState,
    pub index: SearchIndex,
}

impl Snapshot {
    fn empty() -> Self {
        Self { generation: 0, state: IndexState::Empty, index: SearchIndex::default() }
    }
}

#[derive(Debug)]
struct BuildRequest {
    generation: u64,
    sources: Vec<Source>,
}

#[derive(Debug)]
struct Shared {
    generation: AtomicU64,
    published: Mutex<Arc<Snapshot>>,
    ready: Condvar,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Swaps in `snapshot` unless a newer request arrived. Returns whether it was published.
    fn publish(&self, snapshot: Snapshot) -> bool {
        let mut published = self.published.lock();
        if !self.is_current(snapshot.generation) {
            return false;
        }
        let ready = snapshot.state == IndexState::Ready;
        *published = Arc::new(snapshot);
        if ready {
            self.ready.notify_all();
        }
        true
    }
}

#[derive(Debug)]
pub struct IndexBuilder {
    shared: Arc<Shared>,
    sender: Option<Sender<BuildRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl IndexBuilder {
    pub fn new(store: Arc<NormalizedStore>) -> Result<Self> {
        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            published: Mutex::new(Arc::new(Snapshot::empty())),
            ready: Condvar::new(),
        });
        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("index-builder".to_string())
            .spawn(move || run_worker(&worker_shared, &store, &receiver))?;
        Ok(Self { shared, sender: Some(sender), worker: Some(worker) })
    }

    /// Starts a rebuild over `sources`, superseding any build in flight. Disabled sources
    /// are left out. Returns the new generation.
    pub fn request_rebuild(&self, sources: Vec<Source>) -> u64 {
        let sources: Vec<Source> = sources.into_iter().filter(|s| s.enabled).collect();
        let generation = {
            let mut published = self.shared.published.lock();
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *published = Arc::new(Snapshot {
                generation,
                state: IndexState::Building,
                index: SearchIndex::default(),
            });
            generation
        };
        info!(generation, sources = sources.len(), "index rebuild requested");
        if let Some(sender) = &self.sender
            && sender.send(BuildRequest { generation, sources }).is_err()
        {
            warn!(generation, "index worker is gone, rebuild dropped");
        }
        generation
    }

    /// Current published snapshot. Never blocks on a build.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.shared.published.lock())
    }

    pub fn state(&self) -> IndexState {
        self.snapshot().state
    }

    /// Blocks until the newest requested build is published, or `timeout` elapses.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut published = self.shared.published.lock();
        loop {
            if published.state == IndexState::Ready && self.shared.is_current(published.generation) {
                return true;
            }
            if published.state == IndexState::Empty {
                return false;
            }
            if self.shared.ready.wait_until(&mut published, deadline).timed_out() {
                return published.state == IndexState::Ready
                    && self.shared.is_current(published.generation);
            }
        }
    }
}

impl Drop for IndexBuilder {
    fn drop(&mut self) {
        // Cancels the build in flight
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("index worker panicked");
        }
    }
}

fn run_worker(shared: &Shared, store: &NormalizedStore, receiver: &Receiver<BuildRequest>) {
    let mut segments: HashMap<String, Arc<Segment>> = HashMap::new();
    while let Ok(mut request) = receiver.recv() {
        // Only the newest queued request matters
        while let Ok(newer) = receiver.try_recv() {
            request = newer;
        }
        if !shared.is_current(request.generation) {
            continue;
        }
        build(shared, store, &request, &mut segments);
    }
    debug!("index worker stopped");
}

fn build(
    shared: &Shared,
    store: &NormalizedStore,
    request: &BuildRequest,
    cache: &mut HashMap<String, Arc<Segment>>,
) {
    let started = Instant::now();
    let mut built: Vec<Arc<Segment>> = Vec::with_capacity(request.sources.len());
    for source in &request.sources {
        if !shared.is_current(request.generation) {
            debug!(generation = request.generation, "build superseded");
            return;
        }
        match source_segment(store, source, cache.get(&source.id)) {
            Ok(segment) => {
                cache.insert(source.id.clone(), Arc::clone(&segment));
                built.push(segment);
            }
            Err(e) => warn!(source = %source.id, error = %e, "source left out of the index"),
        }
        shared.publish(Snapshot {
            generation: request.generation,
            state: IndexState::Building,
            index: SearchIndex::new(built.clone()),
        });
    }

    cache.retain(|id, _| request.sources.iter().any(|s| &s.id == id));
    let docs: usize = built.iter().map(|s| s.len()).sum();
    let published = shared.publish(Snapshot {
        generation: request.generation,
        state: IndexState::Ready,
        index: SearchIndex::new(built),
    });
    if published {
        info!(
            generation = request.generation,
            docs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index published"
        );
    } else {
        debug!(generation = request.generation, "build superseded before publish");
    }
}

/// Builds the segment for one source, reusing `cached` when its files did not move.
fn source_segment(
    store: &NormalizedStore,
    source: &Source,
    cached: Option<&Arc<Segment>>,
) -> Result<Arc<Segment>> {
    let outcome = store.list(&source.id)?;
    if let Some(cached) = cached
        && cached.fingerprint == outcome.fingerprint
    {
        debug!(source = %source.id, "reusing index segment");
        return Ok(Arc::clone(cached));
    }

    let summaries: Vec<_> = outcome.listing.summaries().collect();
    let documents: Vec<DocumentText> = summaries
        .par_iter()
        .filter_map(|summary| match store.hydrate(&source.id, &summary.category, &summary.id) {
            Ok(conversation) if conversation.messages.is_empty() => None,
            Ok(conversation) => Some(DocumentText {
                category: summary.category.clone(),
                id: summary.id.clone(),
                title: conversation.title.clone(),
                body: conversation.search_body(),
                updated_at: summary.updated_at,
            }),
            Err(e) => {
                warn!(source = %source.id, id = %summary.id, error = %e, "conversation left out of the index");
                None
            }
        })
        .collect();
    Ok(Arc::new(Segment::build(&source.id, outcome.fingerprint, documents)))
}
