//! Citation markers embedded in exported message text.
//!
//! - [`markers`] - recognizing the three marker encodings
//! - [`resolver`] - matching markers against a reference table
//! - [`payload`] - the typed payload and its `citepayload:` boundary encoding

pub mod markers;
pub mod payload;
pub mod resolver;

pub use markers::{CitationMarker, MarkerEncoding, find_markers};
pub use payload::{CitationPayload, CitationRef, PayloadError, extract_pills};
pub use resolver::{
    CitationResolver, ReferenceEntry, ReferenceItem, ResolvedCitation, ResolvedText, SpanCitation,
    materialize_spans,
};
