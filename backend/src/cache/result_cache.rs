use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::models::CachedResult;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read-through map of file id to resolved result URL.
///
/// Entries are write-once until they expire. When a backing file is set the
/// map is reloaded from it at startup and rewritten after every insert.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<Mutex<HashMap<String, CachedResult>>>,
    ttl: Duration,
    path: Option<PathBuf>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            path: None,
        }
    }

    pub fn with_file(ttl: Duration, path: PathBuf) -> Result<Self, CacheError> {
        let mut entries: HashMap<String, CachedResult> = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            HashMap::new()
        };
        let now = Utc::now();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        log::info!(
            "Loaded {} cached results from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
            ttl,
            path: Some(path),
        })
    }

    pub fn get(&self, file_id: &str) -> Option<CachedResult> {
        let mut entries = self.lock();
        let expired = entries.get(file_id)?.is_expired_at(Utc::now());
        if expired {
            log::debug!("Cached result for {} expired", file_id);
            entries.remove(file_id);
            return None;
        }
        entries.get(file_id).cloned()
    }

    /// Stores `url` unless a live entry already exists; returns the entry in effect.
    pub fn insert(&self, file_id: &str, url: String) -> CachedResult {
        let (entry, snapshot) = {
            let mut entries = self.lock();
            let now = Utc::now();
            if let Some(existing) = entries.get(file_id).filter(|e| !e.is_expired_at(now)) {
                return existing.clone();
            }
            let entry = CachedResult::new(url, self.ttl);
            entries.insert(file_id.to_string(), entry.clone());
            let snapshot = self.path.as_ref().map(|_| entries.clone());
            (entry, snapshot)
        };

        if let (Some(path), Some(snapshot)) = (&self.path, snapshot) {
            if let Err(e) = persist(path, &snapshot) {
                log::error!("Failed to persist result cache to {}: {}", path.display(), e);
            }
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedResult>> {
        // no insert leaves the map half-updated, so a poisoned lock is still usable
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn persist(path: &Path, entries: &HashMap<String, CachedResult>) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
    fs::rename(tmp, path)?;
    Ok(())
}
