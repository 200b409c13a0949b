//! Persistence Backend Module
//!
//! Storage areas that can hold a mirror of cache entries beyond the lifetime
//! of a single in-memory store. Backends deal in opaque strings: the caller
//! chooses storage keys and serializes payloads.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

// == Persistence Error ==
/// Failures raised by a persistence backend.
///
/// These never cross the cache boundary; the store logs and absorbs them.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage area refused a new key
    #[error("Storage quota exceeded ({0} entries)")]
    QuotaExceeded(usize),

    /// Storage area cannot be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// == Backend Trait ==
/// Key/value storage area used as the cache's persistent mirror.
pub trait PersistenceBackend: Debug + Send + Sync {
    /// Reads the payload stored under `key`, `None` if there is none.
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Stores `payload` under `key`, replacing any previous payload.
    fn write(&self, key: &str, payload: &str) -> Result<(), PersistenceError>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    /// Lists every stored key starting with `prefix`.
    fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError>;
}

// == Memory Backend ==
/// In-process storage area.
///
/// Clones share the same map, so the storage outlives any one cache store
/// holding it. An optional quota and an availability switch make it possible
/// to exercise the failure paths of the mirror.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    items: Arc<Mutex<BTreeMap<String, String>>>,
    quota: Option<usize>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty, unbounded storage area.
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(BTreeMap::new())),
            quota: None,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Creates a storage area that holds at most `max_entries` keys.
    pub fn with_quota(max_entries: usize) -> Self {
        Self {
            quota: Some(max_entries),
            ..Self::new()
        }
    }

    /// Toggles whether every operation fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored keys, regardless of prefix.
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn items(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, PersistenceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "memory backend switched off".to_string(),
            ));
        }
        self.items
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory backend lock poisoned".to_string()))
    }
}

impl PersistenceBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.items()?.get(key).cloned())
    }

    fn write(&self, key: &str, payload: &str) -> Result<(), PersistenceError> {
        let mut items = self.items()?;
        if let Some(max) = self.quota {
            if !items.contains_key(key) && items.len() >= max {
                return Err(PersistenceError::QuotaExceeded(max));
            }
        }
        items.insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.items()?.remove(key);
        Ok(())
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        Ok(self
            .items()?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// == File Backend ==
/// Storage area backed by one JSON file per key in a directory.
///
/// File names are the hex-encoded storage key, so arbitrary keys map to
/// portable names and listing can recover the original key.
///
/// I/O is blocking `std::fs` and runs on the calling thread while the
/// owning cache holds its lock. Entries are small JSON documents, so this
/// stays cheap on a local disk; a slow or networked directory stalls every
/// operation on the namespaces it backs.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex_encode(key)))
    }
}

impl PersistenceBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, payload: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), payload)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        for item in dir {
            let file_name = item?.file_name();
            // Files we did not write are skipped
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(key) = hex_decode(stem) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// == Utility Functions ==
fn hex_encode(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(encoded: &str) -> Option<String> {
    if encoded.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..encoded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(encoded.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
