//! Persisted source list.
//!
//! The only durable state: an ordered list of source descriptors stored as pretty JSON and
//! rewritten atomically (temp file + rename) after every successful mutation.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::detector::detect;
use crate::error::{ArchiveError, Result};
use crate::models::{Source, SourceKind, Vendor};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    sources: Vec<Source>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the source list. A missing file is an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] when the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<Source>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no source list yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(ArchiveError::config(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        let file: ConfigFile = serde_json::from_str(&json).map_err(|e| {
            ArchiveError::config(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        if file.version > CONFIG_VERSION {
            warn!(
                path = %self.path.display(),
                version = file.version,
                "source list was written by a newer version"
            );
        }
        Ok(dedupe_ids(file.sources))
    }

    /// Writes the source list atomically, creating the parent directory if needed.
    pub fn save(&self, sources: &[Source]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = ConfigFile { version: CONFIG_VERSION, sources: sources.to_vec() };
        let json = serde_json::to_string_pretty(&file)?;

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp = self.path.with_file_name(temp_name);
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        info!(path = %self.path.display(), sources = sources.len(), "saved source list");
        Ok(())
    }
}

/// Checks a proposed source list before it is persisted.
///
/// # Errors
///
/// Returns [`ArchiveError::Config`] for empty or duplicate ids and for empty or relative
/// root paths.
pub fn validate_sources(sources: &[Source]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        let id = source.id.trim();
        if id.is_empty() {
            return Err(ArchiveError::config("source id must not be empty"));
        }
        if !seen.insert(id) {
            return Err(ArchiveError::config(format!("duplicate source id '{}'", id)));
        }
        if source.root_path.as_os_str().is_empty() {
            return Err(ArchiveError::config(format!("source '{}' has no root path", id)));
        }
        if !source.root_path.is_absolute() {
            return Err(ArchiveError::config(format!(
                "source '{}' root must be absolute: {}",
                id,
                source.root_path.display()
            )));
        }
    }
    Ok(())
}

/// Sources to register for `root`: every immediate child directory that holds a vendor
/// export, or `root` itself when no child does. Roots already in `existing` are skipped.
pub fn import_candidates(root: &Path, existing: &[Source]) -> Result<Vec<Source>> {
    if !root.is_dir() {
        return Err(ArchiveError::config(format!("{} is not a directory", root.display())));
    }
    let mut children: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .collect();
    children.sort();

    let mut exports: Vec<(PathBuf, Vendor)> = children
        .into_iter()
        .filter_map(|dir| export_vendor(&dir).map(|vendor| (dir, vendor)))
        .collect();
    if exports.is_empty()
        && let Some(vendor) = export_vendor(root)
    {
        exports.push((root.to_path_buf(), vendor));
    }

    let known_roots: HashSet<&Path> = existing.iter().map(|s| s.root_path.as_path()).collect();
    let mut taken: HashSet<String> = existing.iter().map(|s| s.id.clone()).collect();
    let mut found = Vec::new();
    for (dir, vendor) in exports {
        if known_roots.contains(dir.as_path()) {
            continue;
        }
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let id = unique_id(&slugify(&name), &mut taken);
        debug!(id, vendor = %vendor, root = %dir.display(), "import candidate");
        found.push(Source::new(id, SourceKind::from(vendor), dir));
    }
    Ok(found)
}

/// Detected vendor of `dir`, requiring per-file exports to actually contain JSON files
/// (detection alone would accept any directory).
fn export_vendor(dir: &Path) -> Option<Vendor> {
    match detect(dir)? {
        Vendor::Chatgpt => WalkDir::new(dir)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "json"))
            .then_some(Vendor::Chatgpt),
        vendor => Some(vendor),
    }
}

/// Lowercase ASCII slug; anything else collapses to `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() { "source".to_string() } else { slug.to_string() }
}

/// A slug id for `name` that does not collide with any id in `existing`.
pub fn suggest_id(name: &str, existing: &[Source]) -> String {
    let mut taken: HashSet<String> = existing.iter().map(|s| s.id.clone()).collect();
    unique_id(&slugify(name), &mut taken)
}

fn unique_id(base: &str, taken: &mut HashSet<String>) -> String {
    let mut id = base.to_string();
    let mut n = 2;
    while taken.contains(&id) {
        id = format!("{base}-{n}");
        n += 1;
    }
    taken.insert(id.clone());
    id
}

fn dedupe_ids(sources: Vec<Source>) -> Vec<Source> {
    let mut taken = HashSet::new();
    sources
        .into_iter()
        .map(|mut source| {
            if taken.contains(&source.id) {
                let renamed = unique_id(&source.id, &mut taken);
                warn!(id = %source.id, renamed, "duplicate source id in config");
                source.id = renamed;
            } else {
                taken.insert(source.id.clone());
            }
            source
        })
        .collect()
}
