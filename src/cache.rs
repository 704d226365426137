//! # TTL Cache
//! In-memory key → value store with absolute per-entry expiry.
//!
//! A miss is either "never set" or "expired". There is no eviction beyond
//! expiry; size is bounded by the key cardinality of the caller. Operations
//! never fail: a poisoned lock degrades to "always miss" and dropped writes.
//! Same-key races are last-write-wins.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Longest lifetime an entry can get; larger TTLs are capped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe TTL cache. Wrap in `Arc` to share across tasks.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a clone of the live value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.read().ok()?;
        let entry = guard.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let Some(expires_at) = Instant::now().checked_add(ttl.min(MAX_TTL)) else {
            return;
        };
        let Ok(mut guard) = self.inner.write() else {
            return;
        };
        guard.insert(key, CacheEntry { value, expires_at });
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut guard) = self.inner.write() else {
            return 0;
        };
        let now = Instant::now();
        let before = guard.len();
        guard.retain(|_, e| now < e.expires_at);
        before - guard.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
