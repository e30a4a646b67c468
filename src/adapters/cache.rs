//! Change detection for backing files.
//!
//! Adapters key every cache on a [`FileStamp`] (modification time + size). A cached value is
//! reused only while the stamp is unchanged, and checking a stamp never reads file contents.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, Metadata};
use std::hash::{Hash, Hasher};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub mtime_nanos: u128,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self { mtime_nanos, size: metadata.len() }
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        Ok(Self::from_metadata(&fs::metadata(path)?))
    }

    /// Check if the file has changed (mtime or size differs, or it is gone)
    pub fn is_stale(&self, path: &Path) -> bool {
        Self::from_path(path).map(|current| current != *self).unwrap_or(true)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.mtime_nanos / 1_000_000_000).ok()?;
        let nanos = (self.mtime_nanos % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

/// Stat-only summary of everything a source listing depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFingerprint {
    pub hash: u64,
    pub files: usize,
    pub newest_mtime: Option<DateTime<Utc>>,
}

/// Accumulates file stamps into a [`SourceFingerprint`].
#[derive(Debug)]
pub struct FingerprintBuilder {
    hasher: DefaultHasher,
    files: usize,
    newest: u128,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self { hasher: DefaultHasher::new(), files: 0, newest: 0 }
    }

    pub fn add(&mut self, key: &str, stamp: Option<FileStamp>) {
        key.hash(&mut self.hasher);
        stamp.hash(&mut self.hasher);
        if let Some(stamp) = stamp {
            self.files += 1;
            self.newest = self.newest.max(stamp.mtime_nanos);
        }
    }

    pub fn finish(self) -> SourceFingerprint {
        let newest_mtime = (self.newest > 0)
            .then(|| FileStamp { mtime_nanos: self.newest, size: 0 }.modified_at())
            .flatten();
        SourceFingerprint { hash: self.hasher.finish(), files: self.files, newest_mtime }
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}
