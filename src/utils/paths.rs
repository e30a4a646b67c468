use std::borrow::Cow;
use std::env;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::{ArchiveError, Result};

// Characters percent-encoded inside attachment link query values
const QUERY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'(')
    .add(b')')
    .add(b'[')
    .add(b']')
    .add(b'=');

/// Builds the retrieval link for a file inside a source root.
///
/// # Examples
///
/// ```
/// use chat_archive::utils::attachment_url;
///
/// assert_eq!(
///     attachment_url("gemini", "Takeout/My Activity/cat 1.png"),
///     "/api/file?source=gemini&path=Takeout/My%20Activity/cat%201.png"
/// );
/// ```
pub fn attachment_url(source_id: &str, relative_path: &str) -> String {
    format!(
        "/api/file?source={}&path={}",
        utf8_percent_encode(source_id, QUERY_ENCODE_SET),
        utf8_percent_encode(relative_path, QUERY_ENCODE_SET)
    )
}

/// Resolves `relative` against `root`, refusing anything that lands outside the root.
///
/// Lexical checks reject absolute paths and `..` components; the canonicalized result must
/// also stay under the canonical root so symlinks cannot escape.
///
/// # Errors
///
/// Returns [`ArchiveError::PathSecurity`] for escaping paths and [`ArchiveError::NotFound`]
/// when the target does not exist.
pub fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(ArchiveError::PathSecurity("empty path".to_string()));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(ArchiveError::PathSecurity(format!(
                    "path contains '..' component: {}",
                    relative
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathSecurity(format!(
                    "path must be relative: {}",
                    relative
                )));
            }
        }
    }

    let canonical_root = root.canonicalize().map_err(|e| {
        ArchiveError::config(format!("source root {} is unreachable: {}", root.display(), e))
    })?;
    let joined = canonical_root.join(candidate);
    let resolved = match joined.canonicalize() {
        Ok(path) => path,
        Err(_) => return Err(ArchiveError::NotFound(format!("file {}", relative))),
    };
    if !resolved.starts_with(&canonical_root) {
        return Err(ArchiveError::PathSecurity(format!("path resolves outside root: {}", relative)));
    }
    Ok(resolved)
}

/// Relative path of `path` under `root` with `/` separators.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<Cow<'_, str>> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Validates that a file's size is within `max_bytes`
///
/// Takes an open file handle to avoid TOCTOU (time-of-check-time-of-use)
/// races between the size check and the read that follows.
///
/// # Errors
///
/// Returns an error if the metadata cannot be read or the file is larger than `max_bytes`.
pub fn validate_file_size(file: &File, path: &Path, max_bytes: u64) -> Result<()> {
    let file_size = file.metadata()?.len();
    if file_size > max_bytes {
        return Err(ArchiveError::format(
            path,
            format!("file too large ({} bytes, max {} bytes)", file_size, max_bytes),
        ));
    }
    Ok(())
}

/// Formats a path with ~ substitution for the home directory
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use chat_archive::utils::format_path_with_tilde;
///
/// let path = PathBuf::from("/Users/alice/exports");
/// // Returns "~/exports" if HOME=/Users/alice
/// let formatted = format_path_with_tilde(&path);
/// ```
pub fn format_path_with_tilde(path: &Path) -> String {
    format_path_with_tilde_internal(path, None)
}

pub(crate) fn format_path_with_tilde_internal(path: &Path, home_override: Option<&str>) -> String {
    let home_from_env = env::var("HOME").ok();
    let home = home_override.or(home_from_env.as_deref());

    let path_str = path.to_string_lossy();
    if let Some(home) = home
        && !home.is_empty()
        && path_str.starts_with(home)
    {
        return path_str.replacen(home, "~", 1);
    }

    match path_str {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}
