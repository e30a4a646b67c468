//! Source detection: classify an export directory by its marker files.
//!
//! Checks run in a fixed priority order and only stat the filesystem:
//!
//! 1. `conversations.json` at the root: aggregate export ([`Vendor::Claude`])
//! 2. a Takeout `Gemini Apps` activity page ([`Vendor::Gemini`])
//! 3. anything else: one file per conversation ([`Vendor::Chatgpt`])
//!
//! A directory matching several checks takes the first match. Only a missing or
//! non-directory root is unrecognized.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::models::Vendor;

pub const AGGREGATE_FILE: &str = "conversations.json";
pub const PROJECTS_FILE: &str = "projects.json";
pub const MEMORIES_FILE: &str = "memories.json";

const GEMINI_DIR: &str = "Gemini Apps";
const ACTIVITY_NAMES: &[&str] = &["MyActivity.html", "我的活动记录.html"];
const ACTIVITY_PARENTS: &[&[&str]] = &[
    &["Takeout", "My Activity", GEMINI_DIR],
    &["Takeout", "Access Log Activity", "My Activity", GEMINI_DIR],
    &["Takeout", "我的活动", GEMINI_DIR],
];
const TAKEOUT_SEARCH_DEPTH: usize = 4;

/// Classifies `root`. `None` means unrecognized.
pub fn detect(root: &Path) -> Option<Vendor> {
    if !root.is_dir() {
        debug!(root = %root.display(), "source root is not a directory");
        return None;
    }
    let vendor = if root.join(AGGREGATE_FILE).is_file() {
        Vendor::Claude
    } else if find_activity_file(root).is_some() {
        Vendor::Gemini
    } else {
        Vendor::Chatgpt
    };
    debug!(root = %root.display(), vendor = %vendor, "detected source layout");
    Some(vendor)
}

/// Locates the activity page of a Takeout export: canonical locations first, then any
/// HTML page inside a `Gemini Apps` directory under `Takeout/`.
pub fn find_activity_file(root: &Path) -> Option<PathBuf> {
    for parents in ACTIVITY_PARENTS {
        let dir = parents.iter().fold(root.to_path_buf(), |acc, part| acc.join(part));
        for name in ACTIVITY_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let takeout = root.join("Takeout");
    if !takeout.is_dir() {
        return None;
    }
    let mut hits: Vec<PathBuf> = WalkDir::new(&takeout)
        .max_depth(TAKEOUT_SEARCH_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name().eq_ignore_ascii_case(GEMINI_DIR))
        .flat_map(|dir| html_files(dir.path()))
        .collect();
    hits.sort_by_key(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        let preferred = ACTIVITY_NAMES.iter().any(|n| n.to_lowercase() == name);
        (!preferred, p.clone())
    });
    hits.into_iter().next()
}

fn html_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
        })
        .collect()
}
