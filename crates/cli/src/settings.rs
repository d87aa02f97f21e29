//! Configuration file location and loading
//!
//! The file lives at `<config dir>/dirwatch/config.toml` unless `--config`
//! points elsewhere. A missing file means defaults.

use anyhow::{Context, Result};
use dirwatch_core::config::example_config;
use dirwatch_core::WatchConfig;
use std::path::{Path, PathBuf};

/// Default config file path for this user
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dirwatch").join("config.toml"))
}

/// The explicit path if given, otherwise the per-user default
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => config_file_path().context("Could not determine config directory"),
    }
}

/// Load the config and apply the `DIRWATCH_METHOD` override
pub fn load(explicit: Option<&Path>) -> Result<WatchConfig> {
    let path = resolve_path(explicit)?;
    let mut config = WatchConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .apply_env()
        .context("Invalid method in environment override")?;
    Ok(config)
}

/// Write the commented example config unless a file already exists
///
/// Returns true if the file was created.
pub fn init_if_missing(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, example_config())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
