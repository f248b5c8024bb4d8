use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use gdrive_core::DriveFile;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Rendered `files.list` query.
    Query(String),
    /// Full remote path of an entry written during this run.
    Path(String),
}

/// Memoized listings shared by every concurrently running unit.
///
/// A key is written at most once per lifetime: later writers keep the first
/// stored value and readers see either nothing or that value. Empty results
/// are never stored so a folder that is about to be filled gets listed again.
#[derive(Debug, Default)]
pub struct PathCache {
    entries: Mutex<HashMap<CacheKey, Vec<DriveFile>>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<DriveFile>> {
        self.lock().get(key).cloned()
    }

    /// Stores `value` unless the key is already taken and returns whatever
    /// the key holds afterwards.
    pub fn insert_if_absent(&self, key: CacheKey, value: Vec<DriveFile>) -> Vec<DriveFile> {
        if value.is_empty() {
            return value;
        }
        match self.lock().entry(key) {
            Entry::Occupied(existing) => {
                trace!(key = ?existing.key(), "cache key already populated");
                existing.get().clone()
            }
            Entry::Vacant(slot) => slot.insert(value).clone(),
        }
    }

    /// Returns the cached value for `key`, fetching it on a miss.
    ///
    /// The lock is not held across `fetch`, so concurrent misses on one key
    /// may both hit the network; only the first result is kept.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: CacheKey, fetch: F) -> Result<Vec<DriveFile>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<DriveFile>, E>>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let fetched = fetch().await?;
        Ok(self.insert_if_absent(key, fetched))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Vec<DriveFile>>> {
        // A panicking holder cannot leave a half-written entry behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
