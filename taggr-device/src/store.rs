//! File-backed key/value store.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use taggr_core::{Error, Result, Store};

/// [`Store`] implementation persisting to one JSON file, written through on
/// every set so a killed process never loses a role transition.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    map: HashMap<String, String>,
}

impl FileStore {
    /// Load the store from `path`, starting empty when the file is absent.
    pub fn open(path: PathBuf) -> Result<Self> {
        let map = if path.exists() {
            let data = fs::read_to_string(&path)
                .map_err(|err| Error::Store(format!("failed to read {}: {err}", path.display())))?;
            serde_json::from_str(&data)
                .map_err(|err| Error::Store(format!("failed to parse {}: {err}", path.display())))?
        } else {
            HashMap::new()
        };
        Ok(Self { path, map })
    }

    /// The default store at `<taggr home>/state.json`.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::taggr_home()?.join("state.json"))
    }

    fn save(&self) -> Result<()> {
        let data =
            serde_json::to_string_pretty(&self.map).map_err(|err| Error::Store(err.to_string()))?;
        fs::write(&self.path, data)
            .map_err(|err| Error::Store(format!("failed to write {}: {err}", self.path.display())))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        self.save()
    }
}
