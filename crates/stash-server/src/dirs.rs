use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};

/// Location of `config.json`.
///
/// Priority:
/// 1. `STASH_CONFIG` environment variable
/// 2. Platform-specific config dir (`~/.config/stash/config.json`, etc.)
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("STASH_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let dirs = ProjectDirs::from("", "", "stash")
        .context("could not determine platform config directory")?;
    Ok(dirs.config_dir().join("config.json"))
}

/// Directory served when the config does not name one: `~/stash`, falling
/// back to the platform data dir.
pub fn default_serve_dir() -> Result<PathBuf> {
    if let Some(user) = UserDirs::new() {
        return Ok(user.home_dir().join("stash"));
    }
    let dirs = ProjectDirs::from("", "", "stash")
        .context("could not determine platform data directory")?;
    Ok(dirs.data_dir().join("files"))
}
