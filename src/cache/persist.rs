// Persistence for the response cache.
// Serializes cache entries and config to a storage backend. Failures are
// logged and swallowed; they never reach the cache store.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

use super::keys::storage_key;
use super::store::{CacheConfig, CacheEntry};

/// What gets persisted. Stats are not included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub entries: Vec<CacheEntry>,
    pub config: CacheConfig,
}

/// Where persisted snapshots live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Survives restarts (user cache directory).
    #[default]
    Local,
    /// Survives until the login session ends (runtime directory).
    Session,
    /// Lives only as long as the process.
    Memory,
}

/// A string key/value store.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Directory the values live in, for backends that write to disk.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        write_atomic(&self.path(key), value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.dir)
    }
}

/// Write a file via a temp file and rename so readers never see a partial write.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tutor-ai")
}

/// Directory for durable snapshots (~/.cache/tutor-ai on Linux).
pub fn local_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Directory for session snapshots. Falls back to the temp dir where the
/// platform has no runtime directory.
pub fn session_dir() -> PathBuf {
    project_dirs()
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::temp_dir().join("tutor-ai"))
}

/// Construct the backend for a storage kind.
pub fn backend_for(kind: StorageKind) -> Box<dyn StorageBackend> {
    match kind {
        StorageKind::Local => match local_dir() {
            Some(dir) => Box::new(FileStorage::new(dir)),
            None => {
                warn!("no cache directory available, persisting in memory only");
                Box::new(MemoryStorage::new())
            }
        },
        StorageKind::Session => Box::new(FileStorage::new(session_dir())),
        StorageKind::Memory => Box::new(MemoryStorage::new()),
    }
}

/// Saves and restores cache snapshots under `{prefix}-store`.
pub struct PersistenceAdapter {
    key: String,
    backend: Box<dyn StorageBackend>,
}

impl PersistenceAdapter {
    pub fn new(prefix: &str, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            key: storage_key(prefix),
            backend,
        }
    }

    /// Adapter for the backend and prefix named in a cache config.
    pub fn for_config(config: &CacheConfig) -> Self {
        Self::new(&config.key_prefix, backend_for(config.storage))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn location(&self) -> Option<&Path> {
        self.backend.location()
    }

    pub fn save(&self, snapshot: &CacheSnapshot) {
        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %self.key, "failed to serialize cache snapshot: {}", e);
                return;
            }
        };
        if let Err(e) = self.backend.write(&self.key, &json) {
            warn!(key = %self.key, "failed to persist cache snapshot: {}", e);
        }
    }

    pub fn load(&self) -> Option<CacheSnapshot> {
        let json = match self.backend.read(&self.key) {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, "failed to read cache snapshot: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(snapshot) => {
                debug!(key = %self.key, "restored cache snapshot");
                Some(snapshot)
            }
            Err(e) => {
                warn!(key = %self.key, "discarding unreadable cache snapshot: {}", e);
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(&self.key) {
            warn!(key = %self.key, "failed to clear cache snapshot: {}", e);
        }
    }
}

/// Replace characters that are unsafe in file names.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Storage that always fails, for exercising the swallow-and-log contract.
#[cfg(test)]
pub(crate) struct FailingStorage;

#[cfg(test)]
impl StorageBackend for FailingStorage {
    fn read(&self, _key: &str) -> Result<Option<String>> {
        Err(std::io::Error::other("disk on fire").into())
    }

    fn write(&self, _key: &str, _value: &str) -> Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::StorageFull, "quota exceeded").into())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Err(std::io::Error::other("disk on fire").into())
    }
}
