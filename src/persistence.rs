//! Key/value persistence engines backing the settings document.
//!
//! Every engine is scoped to a single named document. Writes land in memory
//! first and reach durable storage on `save()`.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Errors raised while persisting a document
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence engine contract.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    /// Flush the in-memory document to durable storage.
    fn save(&self) -> Result<(), PersistenceError>;

    /// Set every entry and flush them as one write.
    fn commit(&self, entries: &[(String, Value)]) -> Result<(), PersistenceError> {
        for (key, value) in entries {
            self.set(key, value.clone());
        }
        self.save()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// JSON file engine (one document per file).
pub struct JsonFileStore {
    data: RwLock<Map<String, Value>>,
    file_path: PathBuf,
}

impl JsonFileStore {
    /// Open the document at `file_path`, starting empty if it is missing or unreadable.
    pub fn open(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();

        // Ensure the directory exists
        if let Some(parent) = file_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!(
                    "[persistence] Could not create {}: {}",
                    parent.display(),
                    e
                );
            }
        }

        let data = match Self::load_from_file(&file_path) {
            Ok(data) => data,
            Err(e) => {
                log::warn!(
                    "[persistence] Starting with an empty document ({}): {}",
                    file_path.display(),
                    e
                );
                Map::new()
            }
        };

        Self {
            data: RwLock::new(data),
            file_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn load_from_file(file_path: &Path) -> Result<Map<String, Value>, PersistenceError> {
        let content = match fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: file_path.to_path_buf(),
                    source,
                })
            }
        };

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    fn write_file(&self, data: &Map<String, Value>) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(data)?;

        // Write to a sibling file and rename so readers never see a torn document.
        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, content).map_err(|source| PersistenceError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.file_path).map_err(|source| PersistenceError::Io {
            path: self.file_path.clone(),
            source,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.data).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        write_lock(&self.data).insert(key.to_string(), value);
    }

    fn save(&self) -> Result<(), PersistenceError> {
        let data = read_lock(&self.data);
        self.write_file(&data)
    }

    fn commit(&self, entries: &[(String, Value)]) -> Result<(), PersistenceError> {
        let mut data = write_lock(&self.data);
        for (key, value) in entries {
            data.insert(key.clone(), value.clone());
        }
        self.write_file(&data)
    }
}

/// In-memory engine for ephemeral sessions and tests.
///
/// Keeps the last saved document apart from the working one so callers can
/// tell what actually reached storage.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Map<String, Value>>,
    saved: RwLock<Map<String, Value>>,
    save_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed `save()` calls
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// The document as of the last `save()`
    pub fn saved_document(&self) -> Map<String, Value> {
        read_lock(&self.saved).clone()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.data).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        write_lock(&self.data).insert(key.to_string(), value);
    }

    fn save(&self) -> Result<(), PersistenceError> {
        let data = read_lock(&self.data).clone();
        *write_lock(&self.saved) = data;
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
