//! Time-bounded response cache.
//!
//! Entries expire purely by TTL; there is no capacity bound. Only successful
//! fetch results are stored.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::warn;
use tokio::time::Instant;

use crate::key::RequestKey;

/// Result of a cache lookup.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Lookup<V> {
    Hit(V),
    Miss,
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    /// `None` when the TTL reaches past the clock's range: never expires.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now <= expires_at)
    }
}

/// TTL cache keyed by [`RequestKey`].
pub(crate) struct ResponseCache<V> {
    entries: RwLock<HashMap<RequestKey, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<RequestKey, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Response cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<RequestKey, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Response cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Return the cached value if it is still within its TTL at `now`.
    /// An expired entry is dropped.
    pub(crate) fn lookup(&self, key: &RequestKey, now: Instant) -> Lookup<V> {
        {
            let entries = self.read_entries();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Lookup::Hit(entry.value.clone()),
                Some(_) => {}
                None => return Lookup::Miss,
            }
        }

        // Re-check under the write lock: a concurrent store may have refreshed it.
        let mut entries = self.write_entries();
        if let Some(entry) = entries.get(key) {
            if entry.is_live(now) {
                return Lookup::Hit(entry.value.clone());
            }
            entries.remove(key);
        }
        Lookup::Miss
    }

    /// Insert or overwrite `key` with a fresh TTL starting at `now`.
    pub(crate) fn store(&self, key: RequestKey, value: V, now: Instant) {
        let entry = CacheEntry {
            value,
            expires_at: now.checked_add(self.ttl),
        };
        self.write_entries().insert(key, entry);
    }

    /// Drop every expired entry; returns how many were removed.
    pub(crate) fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub(crate) fn len(&self) -> usize {
        self.read_entries().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
