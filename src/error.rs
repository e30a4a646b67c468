//! Error taxonomy surfaced by the archive core.
//!
//! Only failures that are terminal for a single operation live here. Partial parses are
//! reported as a skipped count on listings and index readiness is a field on the search
//! response, so neither has a variant.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Bad or unreachable source configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A record does not match the shape expected for its vendor.
    #[error("format error in {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    /// A requested file path escapes its source root.
    #[error("path escapes source root: {0}")]
    PathSecurity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArchiveError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format { path: path.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
