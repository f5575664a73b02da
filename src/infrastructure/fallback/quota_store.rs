use crate::application::ports::FallbackStore;
use crate::shared::error::AppError;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Small key-value store with a strict byte quota (keys plus values), kept in
/// memory and optionally persisted to a JSON file after every mutation.
pub struct QuotaKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: u64,
    file: Option<PathBuf>,
}

impl QuotaKeyValueStore {
    pub fn in_memory(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes,
            file: None,
        }
    }

    /// Opens a file-backed store. An unreadable or corrupt file starts empty.
    pub fn open(path: impl AsRef<Path>, quota_bytes: u64) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<HashMap<String, String>>(&raw).unwrap_or_else(|err| {
                warn!(target: "offline::fallback", path = %path.display(), error = %err, "discarding corrupt fallback file");
                HashMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            entries: Mutex::new(entries),
            quota_bytes,
            file: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| AppError::Storage("fallback store lock poisoned".to_string()))
    }

    /// Replaces the file through a sibling temp file, so a reader sees either
    /// the previous or the new contents.
    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), AppError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let serialized = serde_json::to_vec(entries)?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(&serialized)?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|err| AppError::from(err.error))?;
        Ok(())
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

fn usage_of(entries: &HashMap<String, String>) -> u64 {
    entries.iter().map(|(k, v)| entry_size(k, v)).sum()
}

impl FallbackStore for QuotaKeyValueStore {
    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut entries = self.lock()?;
        let current = usage_of(&entries);
        let replaced = entries.get(key).map(|old| entry_size(key, old)).unwrap_or(0);
        let needed = entry_size(key, value);
        let available = self.quota_bytes.saturating_sub(current - replaced);

        if needed > available {
            debug!(target: "offline::fallback", key, needed, available, "fallback quota exceeded");
            return Err(AppError::QuotaExceeded { needed, available });
        }

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn usage_bytes(&self) -> u64 {
        self.lock().map(|entries| usage_of(&entries)).unwrap_or(0)
    }

    fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }
}
