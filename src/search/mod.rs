//! Full-text search over the normalized corpus.
//!
//! - [`tokenizer`] - Unicode words plus CJK bigrams
//! - [`index`] - per-source segments with ranked AND queries
//! - [`snippet`] - highlighted result windows
//! - [`builder`] - background construction with supersession and atomic publish

pub mod builder;
pub mod index;
pub mod snippet;
pub mod tokenizer;

pub use builder::{IndexBuilder, IndexState, Snapshot};
pub use index::{DEFAULT_LIMIT, DocumentText, MAX_LIMIT, QueryTerms, SearchIndex, Segment};
pub use tokenizer::{Token, TokenKind, tokenize};
