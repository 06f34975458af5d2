//! Key/value storage backends
//!
//! The simulated store layers its records over two string-keyed stores: one
//! durable across sessions and one scoped to the current session. Values are
//! JSON text, the same contract browser storage offers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::types::Result;

/// String key/value storage
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove_item(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Vec<String>;
}

// =============================================================================
// Memory Store
// =============================================================================

/// Process-local store, gone when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.items.iter().map(|e| e.key().clone()).collect()
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Store persisted as one JSON object file.
///
/// Every mutation rewrites the file through a temp file and rename, so a
/// crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    ///
    /// A file that is not a JSON object of strings is logged and ignored.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let items = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, String>>(&text) {
                Ok(items) => items,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable store file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), items = items.len(), "FileStore opened");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove every key and persist the empty store
    pub fn clear_all(&self) -> Result<()> {
        let mut items = self.lock();
        items.clear();
        self.persist(&items)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(items)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.lock();
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.lock();
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
