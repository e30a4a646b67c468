//! Data models for archived chat exports.
//!
//! - [`Source`] - one configured vendor export root
//! - [`Conversation`] / [`Message`] - vendor-neutral hydrated conversations
//! - [`ConversationSummary`] / [`ConversationListing`] - listing entries grouped by category
//! - [`SearchResponse`] - ranked query results with readiness

pub mod conversation;
pub mod search;
pub mod source;

pub use conversation::{
    Conversation, ConversationListing, ConversationMeta, ConversationSummary, Message, Role,
    ThinkingStep,
};
pub use search::{Highlight, SearchHit, SearchResponse, SearchScope, SearchStats};
pub use source::{Source, SourceKind, Vendor};
