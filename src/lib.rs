//! Chat Archive - browse and search archived AI-chat exports
//!
//! This library ingests export directories from three chat vendors and presents them as one
//! vendor-neutral corpus:
//!
//! - Detecting which export layout a directory holds
//! - Normalizing per-file, aggregate and activity-log exports into [`Conversation`]s
//! - Resolving embedded citation markers into structured payloads
//! - Building a full-text index (Latin words plus CJK bigrams) in the background
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use chat_archive::{ArchiveService, SearchScope};
//!
//! let service = ArchiveService::open("/home/alice/.config/chat-archive/sources.json")?;
//! service.wait_until_ready(Duration::from_secs(30));
//! let response = service.search("borrow checker", &SearchScope::AllSources);
//! println!("{} hits", response.results.len());
//! # Ok::<(), chat_archive::ArchiveError>(())
//! ```

pub mod adapters;
pub mod citations;
pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod models;
pub mod search;
pub mod service;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use detector::detect;
pub use error::{ArchiveError, Result};
pub use models::{
    Conversation, ConversationListing, ConversationSummary, Message, Role, SearchResponse,
    SearchScope, Source, SourceKind, Vendor,
};
pub use search::IndexState;
pub use service::ArchiveService;
