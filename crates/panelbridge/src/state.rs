//! Local key-value state used when no host channel is available.
//!
//! Values are stored JSON-encoded, one string per key. With a backing file the
//! whole map is rewritten on every change, which is fine for the handful of UI
//! settings a panel keeps.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state entry '{key}' is not valid JSON: {source}")]
    Entry {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    entries: StdMutex<BTreeMap<String, String>>,
}

impl StateStore {
    /// Process-scoped store; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: StdMutex::new(BTreeMap::new()),
        }
    }

    /// Open a file-backed store. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StateError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened state store");

        Ok(Self {
            path: Some(path),
            entries: StdMutex::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        let entries = self.lock();
        let Some(encoded) = entries.get(key) else {
            return Ok(None);
        };
        serde_json::from_str(encoded)
            .map(Some)
            .map_err(|source| StateError::Entry {
                key: key.to_string(),
                source,
            })
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>, StateError> {
        self.get(key)
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StateError> {
        let encoded = serde_json::to_string(value).map_err(|source| StateError::Entry {
            key: key.to_string(),
            source,
        })?;
        let mut entries = self.lock();
        entries.insert(key.to_string(), encoded);
        self.persist(&entries)
    }

    /// Returns whether the key was present.
    pub fn remove(&self, key: &str) -> Result<bool, StateError> {
        let mut entries = self.lock();
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // Entries are plain strings; a panic mid-insert can't leave them half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StateError::Io {
            path: path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(entries).map_err(|e| io_err(io::Error::other(e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, bytes).map_err(io_err)?;
        tracing::trace!(path = %path.display(), entries = entries.len(), "Persisted state");
        Ok(())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
