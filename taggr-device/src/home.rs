//! Taggr home directory resolution.

use std::path::PathBuf;

use taggr_core::{Error, Result};

/// Get the taggr home directory, creating it if needed. `TAGGR_HOME`
/// overrides the default of `~/.taggr`.
pub fn taggr_home() -> Result<PathBuf> {
    let home = match std::env::var("TAGGR_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir()
            .ok_or_else(|| Error::Store("no home directory".to_string()))?
            .join(".taggr"),
    };

    if !home.exists() {
        std::fs::create_dir_all(&home)
            .map_err(|err| Error::Store(format!("failed to create {}: {err}", home.display())))?;
    }

    Ok(home)
}
