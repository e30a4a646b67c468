use std::env;
use std::path::PathBuf;

use crate::error::{ArchiveError, Result};

/// Environment variable overriding the source list location.
pub const CONFIG_ENV_VAR: &str = "CHAT_ARCHIVE_CONFIG";

const APP_DIR: &str = "chat-archive";
const SOURCES_FILENAME: &str = "sources.json";

/// Location of the persisted source list.
///
/// `CHAT_ARCHIVE_CONFIG` wins when set; otherwise the platform config directory is used
/// (`~/.config/chat-archive/sources.json` on Linux).
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir()
        .ok_or_else(|| ArchiveError::config("platform config directory is unavailable"))?;
    Ok(base.join(APP_DIR).join(SOURCES_FILENAME))
}
