//! In-memory volatile store.

use chrono::Utc;
use sizing_core::{CacheEntry, CacheKey};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace};

/// Fast in-memory key to entry storage.
///
/// Entries live in a `RwLock`-protected `HashMap` and are lost when the store
/// is dropped. The store does not interpret `stored_at + ttl_ms` on reads;
/// the [`CacheService`](crate::CacheService) does. Expired entries are only
/// removed by [`sweep_expired`](Self::sweep_expired), either on demand or
/// from the task started by [`spawn_sweeper`](Self::spawn_sweeper).
#[derive(Debug, Default)]
pub struct VolatileStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl VolatileStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entry` under `key`, replacing any previous entry.
    pub async fn set(&self, key: CacheKey, entry: CacheEntry) {
        self.entries.write().await.insert(key, entry);
    }

    /// Returns a copy of the entry stored under `key`, fresh or not.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Removes the entry stored under `key`, returning it.
    pub async fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.write().await.remove(key)
    }

    /// Returns `true` if an entry exists under `key`, fresh or not.
    pub async fn has(&self, key: &CacheKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Removes every entry.
    ///
    /// The map is emptied under a single write lock, so no reader observes a
    /// partially cleared store.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Returns the number of stored entries, including expired ones.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Removes every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.has_prefix(prefix));
        let removed = before - entries.len();
        debug!(removed, "Removed volatile entries by prefix");
        removed
    }

    /// Removes every entry whose expiry instant has passed.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired volatile entries");
        }
        removed
    }

    /// Starts a background task sweeping expired entries every `interval`.
    ///
    /// The task holds a weak reference and stops once the store is dropped.
    #[must_use = "dropping the handle detaches the sweeper; abort it to stop sweeping early"]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    trace!("Volatile store dropped, stopping sweeper");
                    break;
                };
                store.sweep_expired().await;
            }
        })
    }
}
