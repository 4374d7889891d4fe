//! JSON-file backed key-value store.
//!
//! One file per namespace holding a single JSON object.  Every write
//! replaces the whole file through a temp file + rename, so a reader only
//! ever sees the previous or the new document.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;

/// User preferences: channel order and preferred livestream versions.
pub const PREFERENCES_NAMESPACE: &str = "preferences";
/// Cached schedule document, kept apart from the preferences.
pub const PROGRAM_NAMESPACE: &str = "livestreams.program";

/// Ordered channel id list (preferences) / schedule document (program).
pub const CHANNELS_KEY: &str = "Channels";
pub const PREFERRED_VERSIONS_KEY: &str = "Preferred Versions";

#[derive(Debug)]
pub struct KeyValueStore {
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl KeyValueStore {
    /// Open `<dir>/<namespace>.json`.  A missing or unreadable file opens
    /// as an empty store.
    pub fn open(dir: &Path, namespace: &str) -> Self {
        let path = dir.join(format!("{namespace}.json"));
        let values = Self::load(&path);
        Self {
            path: Some(path),
            values,
        }
    }

    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Map::new(),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("store: ignoring malformed value for {:?}: {}", key, e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut next = self.values.clone();
        next.insert(key.to_string(), serde_json::to_value(value)?);
        self.persist(&next)?;
        self.values = next;
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if !self.values.contains_key(key) {
            return Ok(());
        }
        let mut next = self.values.clone();
        next.remove(key);
        self.persist(&next)?;
        self.values = next;
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(values)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load(path: &Path) -> Map<String, Value> {
        let content = match std::fs::read(path) {
            Ok(c) => c,
            Err(_) => return Map::new(),
        };
        match serde_json::from_slice::<Map<String, Value>>(&content) {
            Ok(values) => values,
            Err(e) => {
                warn!("store: {:?} is corrupt, starting empty: {}", path, e);
                Map::new()
            }
        }
    }
}
