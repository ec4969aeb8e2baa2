use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of per-key async mutexes, the primitive behind every "named
/// mutex" in this codebase: per node, per message id, per encrypted-object
/// download, per file-backed JSON store. Entries are never proactively
/// evicted; locks are cheap and the registry's lifetime matches its owning
/// component, keeping the sharded `DashMap` alive for the process lifetime
/// rather than shrinking it.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>, ahash::RandomState>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        KeyedLocks {
            locks: DashMap::default(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutex for `key`, creating it on first use. The returned
    /// guard serializes all other callers locking the same key until it is
    /// dropped; callers locking different keys never block each other.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}
