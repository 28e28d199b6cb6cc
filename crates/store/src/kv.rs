use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use taxtrack_core::TrackerError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
    #[error("i/o error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

impl From<StoreError> for TrackerError {
    fn from(err: StoreError) -> Self {
        TrackerError::StorageFailure(err.to_string())
    }
}

/// Durable device-scoped string storage.
///
/// Values are opaque strings (JSON documents in practice).  Implementations
/// must be safe to share between tasks; callers never hold a value across a
/// write.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn io_err(key: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Store key for a file inside a [`FileStore`] directory, if it is one.
pub fn store_key_from_path(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_key(stem).ok()?;
    Some(stem.to_string())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    /// Crash-safe replace: the value is written to a `.tmp` sibling, synced,
    /// then renamed over the target.  A crash before the rename leaves the
    /// previous value untouched.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(key, e))?;

        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{key}.json.tmp"));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(Self::io_err(key, err));
        }

        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Self::io_err(key, err));
        }

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_err(key, err)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_err("<dir>", err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err("<dir>", e))?;
            if let Some(key) = store_key_from_path(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries().keys().cloned().collect())
    }
}
