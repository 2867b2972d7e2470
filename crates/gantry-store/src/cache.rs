use crate::key::CacheKey;
use crate::layout::CacheLayout;
use crate::{fsync_dir, StoreError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Size budget for the evaluation cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size_bytes: u64,
    pub evict_when_full: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            evict_when_full: true,
        }
    }
}

/// Exclusive advisory lock over the cache root, held for the duration of a
/// mutation. Released on drop.
struct CacheLock {
    lock_file: File,
}

impl CacheLock {
    fn acquire(lock_path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { lock_file: file })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntryMeta {
    created_at: String,
    size: u64,
}

type CacheIndex = BTreeMap<String, CacheEntryMeta>;

/// Keyed store of serialized evaluation results.
///
/// Entries are written atomically via `NamedTempFile` and tracked in a JSON
/// index carrying creation timestamps. When the configured budget is
/// exceeded, entries are evicted oldest-first; the entry just written is
/// never evicted, so a single oversized result still lands.
pub struct EvaluationCache {
    layout: CacheLayout,
    config: CacheConfig,
}

impl EvaluationCache {
    pub fn new(layout: CacheLayout, config: CacheConfig) -> Result<Self, StoreError> {
        layout.initialize()?;
        Ok(Self { layout, config })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.layout.manifests_dir().join(key.as_str())
    }

    /// Look up a cached result. Absent entries are `Ok(None)`.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    /// Store a result under `key`, then enforce the size budget.
    pub fn put(&self, key: &CacheKey, data: &[u8]) -> Result<(), StoreError> {
        let _lock = CacheLock::acquire(&self.layout.lock_file())?;

        let dir = self.layout.manifests_dir();
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(key))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        let mut index = self.load_index()?;
        index.insert(
            key.as_str().to_owned(),
            CacheEntryMeta {
                created_at: chrono::Utc::now().to_rfc3339(),
                size: data.len() as u64,
            },
        );
        if self.config.evict_when_full {
            self.enforce_budget(&mut index, key)?;
        }
        self.write_index(&index)?;
        Ok(())
    }

    /// Drop every cached entry and the index. The cache stays usable.
    pub fn purge(&self) -> Result<(), StoreError> {
        let _lock = CacheLock::acquire(&self.layout.lock_file())?;

        let manifests = self.layout.manifests_dir();
        if manifests.exists() {
            fs::remove_dir_all(&manifests)?;
        }
        fs::create_dir_all(&manifests)?;

        let index_path = self.layout.index_file();
        if index_path.exists() {
            fs::remove_file(&index_path)?;
        }
        Ok(())
    }

    /// Total size of all cached entries, from the index.
    pub fn total_size(&self) -> Result<u64, StoreError> {
        Ok(self.load_index()?.values().map(|m| m.size).sum())
    }

    fn load_index(&self) -> Result<CacheIndex, StoreError> {
        let path = self.layout.index_file();
        if !path.exists() {
            return Ok(CacheIndex::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    fn write_index(&self, index: &CacheIndex) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(index)?;
        let root = self.layout.root();
        let mut tmp = NamedTempFile::new_in(root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.index_file())
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(root)?;
        Ok(())
    }

    /// Evict oldest entries until the index fits the budget. The entry at
    /// `keep` is exempt.
    fn enforce_budget(&self, index: &mut CacheIndex, keep: &CacheKey) -> Result<(), StoreError> {
        let mut total: u64 = index.values().map(|m| m.size).sum();
        if total <= self.config.max_size_bytes {
            return Ok(());
        }

        let mut candidates: Vec<(String, String, u64)> = index
            .iter()
            .filter(|(k, _)| k.as_str() != keep.as_str())
            .map(|(k, m)| (m.created_at.clone(), k.clone(), m.size))
            .collect();
        candidates.sort();

        for (_, key, size) in candidates {
            if total <= self.config.max_size_bytes {
                break;
            }
            let path = self.layout.manifests_dir().join(&key);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            index.remove(&key);
            total -= size;
            debug!(key = %key, "evicted cache entry");
        }
        Ok(())
    }
}
