use std::{
    hash::Hash,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use dashmap::DashMap;

struct Entry<V> {
    value: Arc<V>,
    touched_at: Instant,
}

/// A TTL map with a secondary weak map behind it: entries fall out of the
/// TTL window after `ttl`, but a caller that is still holding the `Arc` can
/// find the same instance again on the next lookup instead of paying for a
/// fresh decode. Used for the object cache's `MsgOnDisk` map and the inbox
/// reader cache, both with a 60s default TTL.
pub struct TtlWeakCache<K, V> {
    ttl: Duration,
    live: DashMap<K, Entry<V>, ahash::RandomState>,
    weak: DashMap<K, Weak<V>, ahash::RandomState>,
}

impl<K, V> TtlWeakCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlWeakCache {
            ttl,
            live: DashMap::default(),
            weak: DashMap::default(),
        }
    }

    /// Looks up `key`, refreshing its last-touched timestamp on a hit.
    /// Falls back to the weak map when the TTL entry expired but some
    /// caller still holds a strong reference.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if let Some(mut entry) = self.live.get_mut(key) {
            if entry.touched_at.elapsed() <= self.ttl {
                entry.touched_at = Instant::now();
                return Some(entry.value.clone());
            }
        }
        self.live.remove(key);

        if let Some(weak) = self.weak.get(key) {
            if let Some(value) = weak.upgrade() {
                self.live.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        touched_at: Instant::now(),
                    },
                );
                return Some(value);
            }
        }
        self.weak.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: Arc<V>) {
        self.weak.insert(key.clone(), Arc::downgrade(&value));
        self.live.insert(
            key,
            Entry {
                value,
                touched_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &K) {
        self.live.remove(key);
        self.weak.remove(key);
    }
}
