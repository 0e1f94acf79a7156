//! Authoritative datafile storage.
//!
//! Two pieces of shared state live here:
//!
//! - [`DatafileCache`] — key → last committed [`DatafileRecord`]. Pure
//!   in-memory store: `get` never blocks, `put` is atomic (a concurrent
//!   `get` sees the old record or the new one, never a torn write).
//!   Change notification is the refresh coordinator's job, not the
//!   cache's.
//!
//! - [`ActiveKeySet`] — the ordered, deduplicated list of keys the
//!   manager currently considers live. Order is first-registered-first
//!   and matters for display only.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::DatafileRecord;

/// Default maximum number of cached datafiles.
const DEFAULT_MAX_DATAFILES: u64 = 10_000;

/// Thread-safe store of the last committed record per key.
///
/// Backed by a bounded moka cache to prevent unbounded growth in
/// long-running processes. Records are shared as `Arc` so readers hold a
/// consistent snapshot while a `put` replaces the entry.
pub struct DatafileCache {
    entries: moka::sync::Cache<String, Arc<DatafileRecord>>,
}

impl DatafileCache {
    /// Create an empty cache with the default max capacity.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_DATAFILES)
    }

    /// Create a cache with a custom max capacity.
    pub fn with_max_entries(max: u64) -> Self {
        Self {
            entries: moka::sync::Cache::new(max),
        }
    }

    /// Look up the last committed record for a key.
    ///
    /// Returns `None` on cache miss. Never blocks.
    pub fn get(&self, key: &str) -> Option<Arc<DatafileRecord>> {
        self.entries.get(key)
    }

    /// Last known revision for a key, if any.
    pub fn revision(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|record| record.revision)
    }

    /// Insert (or replace) the record for `record.key`.
    ///
    /// Returns the shared handle that was committed.
    pub fn put(&self, record: DatafileRecord) -> Arc<DatafileRecord> {
        let record = Arc::new(record);
        self.entries.insert(record.key.clone(), Arc::clone(&record));
        record
    }

    /// Remove the record for a key, if present.
    pub fn evict(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Remove the records for every listed key.
    pub fn evict_all(&self, keys: &[String]) {
        for key in keys {
            self.entries.invalidate(key);
        }
    }

    /// Snapshot of currently cached keys.
    ///
    /// Not necessarily equal to the active key set — lazily fetched keys
    /// appear here without being registered.
    pub fn list_keys(&self) -> Vec<String> {
        self.entries.run_pending_tasks();
        self.entries.iter().map(|(key, _)| (*key).clone()).collect()
    }

    /// Number of cached records.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DatafileCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered, deduplicated list of live keys.
///
/// Mutated by explicit registration requests and by full refresh; lazy
/// fetches never touch it.
#[derive(Debug, Default)]
pub struct ActiveKeySet {
    keys: RwLock<Vec<String>>,
}

impl ActiveKeySet {
    /// Create an empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current keys in registration order.
    pub fn snapshot(&self) -> Vec<String> {
        self.keys.read().clone()
    }

    /// Replace the set wholesale.
    ///
    /// Returns the normalized (deduplicated, order-preserving) list that
    /// was committed.
    pub fn replace(&self, keys: Vec<String>) -> Vec<String> {
        let keys = dedup_keys(keys);
        *self.keys.write() = keys.clone();
        keys
    }

    /// Append any keys not already present, preserving existing order.
    pub fn merge(&self, keys: &[String]) {
        let mut current = self.keys.write();
        for key in keys {
            if !current.contains(key) {
                current.push(key.clone());
            }
        }
    }

    /// Whether a key is currently registered.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.read().iter().any(|k| k == key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

/// Deduplicate a key list, keeping the first occurrence of each key.
pub(crate) fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
}
