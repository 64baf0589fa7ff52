//! Hybrid cache facade.

use sizing_core::{
    CacheEntry, CacheKey, DurableStore, InvalidationBroadcaster, InvalidationMessage,
    InvalidationTarget, OutcomeKind, Result, SizingError,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, instrument, trace, warn};

use crate::config::{CacheBackend, CacheConfig, DurableMedium};
use crate::file::FileStore;
use crate::memory::VolatileStore;

/// Fallback timeout used when none is configured.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_millis(1_000);

#[derive(Debug, Default)]
struct Counters {
    volatile_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    durable_timeouts: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of cache activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered by the volatile tier.
    pub volatile_hits: u64,
    /// Reads answered by the durable tier (and promoted).
    pub durable_hits: u64,
    /// Reads that found no fresh entry.
    pub misses: u64,
    /// Durable reads abandoned after the fallback timeout.
    pub durable_timeouts: u64,
    /// Calls to [`CacheService::set`].
    pub writes: u64,
    /// Local key, pattern and full invalidations.
    pub invalidations: u64,
}

/// Two-tier cache facade.
///
/// The volatile tier is primary. When a durable tier is configured, reads that
/// miss the volatile tier fall back to it, bounded by the fallback timeout, and
/// fresh durable hits are promoted into the volatile tier. Writes go to the
/// volatile tier immediately and are scheduled on the durable tier in the
/// background; a failing durable write never fails [`set`](Self::set).
///
/// Freshness (`now < stored_at + ttl_ms`) is checked on every read, so expired
/// records are never returned even while they still exist in storage.
#[derive(Debug)]
pub struct CacheService {
    volatile: Option<Arc<VolatileStore>>,
    durable: Option<Arc<dyn DurableStore>>,
    broadcaster: Option<Arc<dyn InvalidationBroadcaster>>,
    instance: String,
    fallback_timeout: Duration,
    pending_writes: Mutex<JoinSet<()>>,
    counters: Counters,
}

impl CacheService {
    fn with_tiers(
        volatile: Option<Arc<VolatileStore>>,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Self {
        Self {
            volatile,
            durable,
            broadcaster: None,
            instance: format!("sizing-{}", std::process::id()),
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
            pending_writes: Mutex::new(JoinSet::new()),
            counters: Counters::default(),
        }
    }

    /// Create a cache with only the volatile tier.
    #[must_use]
    pub fn volatile_only() -> Self {
        Self::with_tiers(Some(Arc::new(VolatileStore::new())), None)
    }

    /// Create a cache with a volatile primary and `durable` secondary tier.
    #[must_use]
    pub fn hybrid(durable: Arc<dyn DurableStore>) -> Self {
        Self::with_tiers(Some(Arc::new(VolatileStore::new())), Some(durable))
    }

    /// Create a cache backed by `durable` alone.
    ///
    /// Reads and writes go straight to the durable tier, each bounded by the
    /// fallback timeout.
    #[must_use]
    pub fn durable_only(durable: Arc<dyn DurableStore>) -> Self {
        Self::with_tiers(None, Some(durable))
    }

    /// Build a cache service from `config`.
    ///
    /// `broadcaster` is attached only when distributed invalidation is enabled.
    ///
    /// # Errors
    /// Returns [`SizingError::Configuration`] if the durable tier cannot be
    /// opened, or if distributed invalidation is enabled without a broadcaster.
    pub fn from_config(
        config: &CacheConfig,
        broadcaster: Option<Arc<dyn InvalidationBroadcaster>>,
    ) -> Result<Self> {
        let mut service = match config.backend {
            CacheBackend::Volatile => Self::volatile_only(),
            CacheBackend::Durable => Self::durable_only(open_durable(config)?),
            CacheBackend::Hybrid => Self::hybrid(open_durable(config)?),
        }
        .with_fallback_timeout(config.fallback_timeout());
        service.instance.clone_from(&config.instance_name);

        match (config.distributed_invalidation, broadcaster) {
            (true, Some(broadcaster)) => {
                service = service.with_broadcaster(broadcaster, config.instance_name.clone());
            }
            (true, None) => {
                return Err(SizingError::Configuration(
                    "distributed invalidation is enabled but no broadcaster was supplied"
                        .to_string(),
                ));
            }
            (false, Some(_)) => debug!("Distributed invalidation disabled, ignoring broadcaster"),
            (false, None) => {}
        }

        debug!(
            backend = ?config.backend,
            medium = ?config.medium,
            instance = %config.instance_name,
            "Cache service configured"
        );
        Ok(service)
    }

    /// Sets the bound on durable reads before they count as a miss.
    #[must_use]
    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Publishes invalidations through `broadcaster`, stamped with `instance`.
    #[must_use]
    pub fn with_broadcaster(
        mut self,
        broadcaster: Arc<dyn InvalidationBroadcaster>,
        instance: impl Into<String>,
    ) -> Self {
        self.broadcaster = Some(broadcaster);
        self.instance = instance.into();
        self
    }

    /// Returns which tiers this service uses.
    #[must_use]
    pub const fn backend(&self) -> CacheBackend {
        match (&self.volatile, &self.durable) {
            (Some(_), Some(_)) => CacheBackend::Hybrid,
            (None, Some(_)) => CacheBackend::Durable,
            _ => CacheBackend::Volatile,
        }
    }

    /// Returns the volatile tier, if configured.
    #[must_use]
    pub const fn volatile(&self) -> Option<&Arc<VolatileStore>> {
        self.volatile.as_ref()
    }

    /// Returns the durable tier, if configured.
    #[must_use]
    pub const fn durable(&self) -> Option<&Arc<dyn DurableStore>> {
        self.durable.as_ref()
    }

    /// Returns the name stamped on published invalidations.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            volatile_hits: c.volatile_hits.load(Ordering::Relaxed),
            durable_hits: c.durable_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            durable_timeouts: c.durable_timeouts.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Returns the fresh entry stored under `key`, if any.
    ///
    /// A returned entry may carry `value: None` (a cached "no data" answer or
    /// failure marker); `None` means a cache miss.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(volatile) = &self.volatile {
            match volatile.get(key).await {
                Some(entry) if entry.is_fresh() => {
                    Counters::bump(&self.counters.volatile_hits);
                    debug!(outcome = %entry.outcome, "Volatile cache hit");
                    return Some(entry);
                }
                Some(_) => trace!("Volatile entry expired"),
                None => {}
            }
        }

        let Some(durable) = &self.durable else {
            Counters::bump(&self.counters.misses);
            debug!("Cache miss");
            return None;
        };

        match tokio::time::timeout(self.fallback_timeout, durable.load(key)).await {
            Ok(Some(entry)) if entry.is_fresh() => {
                Counters::bump(&self.counters.durable_hits);
                if let Some(volatile) = &self.volatile {
                    volatile.set(key.clone(), entry.clone()).await;
                    debug!(outcome = %entry.outcome, "Durable cache hit, promoted");
                } else {
                    debug!(outcome = %entry.outcome, "Durable cache hit");
                }
                return Some(entry);
            }
            Ok(Some(_)) => trace!("Durable entry expired"),
            Ok(None) => {}
            Err(_) => {
                Counters::bump(&self.counters.durable_timeouts);
                warn!(
                    timeout_ms = self.fallback_timeout.as_millis(),
                    "Durable read timed out, treating as miss"
                );
            }
        }

        Counters::bump(&self.counters.misses);
        debug!("Cache miss");
        None
    }

    /// Stores `value` under `key` for `ttl_ms`, recording `outcome`.
    ///
    /// The volatile write completes before this returns; the durable write is
    /// scheduled in the background (see [`flush`](Self::flush)).
    #[instrument(skip(self, value), fields(key = %key, outcome = %outcome, ttl_ms))]
    pub async fn set(
        &self,
        key: &CacheKey,
        value: Option<serde_json::Value>,
        ttl_ms: u64,
        outcome: OutcomeKind,
    ) {
        let entry = CacheEntry::new(value, ttl_ms, outcome);
        Counters::bump(&self.counters.writes);

        if let Some(volatile) = &self.volatile {
            volatile.set(key.clone(), entry.clone()).await;
        }

        let Some(durable) = &self.durable else {
            return;
        };

        if self.volatile.is_some() {
            let durable = Arc::clone(durable);
            let key = key.clone();
            let mut pending = self.pending_writes.lock().await;
            // Reap finished writes so the set does not grow without bound.
            while pending.try_join_next().is_some() {}
            pending.spawn(async move {
                durable.save(&key, &entry).await;
            });
        } else if tokio::time::timeout(self.fallback_timeout, durable.save(key, &entry))
            .await
            .is_err()
        {
            warn!("Durable write timed out");
        }
    }

    /// Waits for scheduled durable writes, up to the fallback timeout.
    ///
    /// Writes still running after the timeout are left to finish on their own.
    pub async fn flush(&self) {
        let mut tasks = std::mem::take(&mut *self.pending_writes.lock().await);
        if tasks.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(self.fallback_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Durable write task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                "Durable writes still pending after fallback timeout"
            );
            tasks.detach_all();
        }
    }

    /// Removes `key` from every tier and notifies sibling instances.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn invalidate(&self, key: &CacheKey) {
        Counters::bump(&self.counters.invalidations);

        if let Some(volatile) = &self.volatile {
            volatile.remove(key).await;
        }

        if let Some(durable) = &self.durable {
            // A write still in flight would otherwise resurrect the key.
            self.flush().await;
            if tokio::time::timeout(self.fallback_timeout, durable.remove(key))
                .await
                .is_err()
            {
                warn!("Durable remove timed out");
            }
        }

        self.publish(InvalidationMessage::key(self.instance.as_str(), key))
            .await;
        debug!("Invalidated key");
    }

    /// Removes every key starting with `prefix` from every tier and notifies
    /// sibling instances.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, prefix: &str) {
        Counters::bump(&self.counters.invalidations);

        let volatile_removed = match &self.volatile {
            Some(volatile) => volatile.remove_prefix(prefix).await,
            None => 0,
        };

        let mut durable_removed = 0;
        if let Some(durable) = &self.durable {
            self.flush().await;
            match tokio::time::timeout(self.fallback_timeout, durable.remove_prefix(prefix)).await
            {
                Ok(removed) => durable_removed = removed,
                Err(_) => warn!("Durable prefix removal timed out"),
            }
        }

        self.publish(InvalidationMessage::prefix(self.instance.as_str(), prefix))
            .await;
        debug!(volatile_removed, durable_removed, "Invalidated prefix");
    }

    /// Removes every entry from every tier and notifies sibling instances.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        Counters::bump(&self.counters.invalidations);

        if let Some(volatile) = &self.volatile {
            volatile.clear().await;
        }
        if let Some(durable) = &self.durable {
            self.flush().await;
            if tokio::time::timeout(self.fallback_timeout, durable.clear_all())
                .await
                .is_err()
            {
                warn!("Durable clear timed out");
            }
        }

        self.publish(InvalidationMessage::prefix(self.instance.as_str(), ""))
            .await;
        debug!("Cleared cache");
    }

    async fn publish(&self, message: InvalidationMessage) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.publish(message).await;
        }
    }

    /// Applies an invalidation published by a sibling instance.
    ///
    /// Only the volatile tier is purged; the durable tier is shared and was
    /// already updated by the publisher. Messages from this instance are
    /// ignored.
    pub async fn apply_invalidation(&self, message: &InvalidationMessage) {
        if message.origin == self.instance {
            trace!("Ignoring own invalidation");
            return;
        }
        let Some(volatile) = &self.volatile else {
            return;
        };
        match &message.target {
            InvalidationTarget::Key(key) => {
                volatile.remove(&CacheKey::raw(key.as_str())).await;
            }
            InvalidationTarget::Prefix(prefix) => {
                volatile.remove_prefix(prefix).await;
            }
        }
        debug!(origin = %message.origin, target = ?message.target, "Applied remote invalidation");
    }

    /// Spawns the task applying sibling invalidations to this service.
    ///
    /// Returns `None` when no broadcaster is configured. The task stops when
    /// the service is dropped or the channel closes. Messages missed because
    /// the subscriber lagged are skipped; their keys expire by TTL.
    #[must_use = "dropping the handle detaches the listener; abort it to stop listening"]
    pub fn listen_for_invalidations(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut receiver = self.broadcaster.as_ref()?.subscribe();
        let service = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        let Some(service) = service.upgrade() else {
                            break;
                        };
                        service.apply_invalidation(&message).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Invalidation subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            trace!("Invalidation listener stopped");
        }))
    }

    /// Spawns the periodic volatile expiry sweep.
    ///
    /// Returns `None` when there is no volatile tier.
    #[must_use = "dropping the handle detaches the sweeper; abort it to stop sweeping early"]
    pub fn spawn_sweeper(&self, interval: Duration) -> Option<JoinHandle<()>> {
        self.volatile
            .as_ref()
            .map(|volatile| volatile.spawn_sweeper(interval))
    }
}

fn open_durable(config: &CacheConfig) -> Result<Arc<dyn DurableStore>> {
    let path = config.storage_path.as_path();
    let store: Arc<dyn DurableStore> = match config.medium {
        DurableMedium::Sqlite => open_sqlite(path)?,
        DurableMedium::Files => Arc::new(FileStore::new(path).map_err(startup_error)?),
    };
    Ok(store)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &Path) -> Result<Arc<dyn DurableStore>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| startup_error(SizingError::Storage(e.to_string())))?;
    }
    let store = crate::sqlite::SqliteStore::new(path).map_err(startup_error)?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &Path) -> Result<Arc<dyn DurableStore>> {
    Err(SizingError::Configuration(
        "the sqlite durable medium requires the `sqlite` feature".to_string(),
    ))
}

fn startup_error(e: SizingError) -> SizingError {
    SizingError::Configuration(format!("cannot open durable tier: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::LocalBroadcaster;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Instant;

    /// A durable tier whose reads never complete.
    #[derive(Debug, Default)]
    struct HangingStore;

    #[async_trait]
    impl DurableStore for HangingStore {
        async fn save(&self, _key: &CacheKey, _entry: &CacheEntry) {}
        async fn load(&self, _key: &CacheKey) -> Option<CacheEntry> {
            std::future::pending().await
        }
        async fn remove(&self, _key: &CacheKey) {}
        async fn keys(&self) -> Vec<CacheKey> {
            Vec::new()
        }
        async fn clear_all(&self) {}
    }

    /// A durable tier whose writes blow up.
    #[derive(Debug, Default)]
    struct BrokenWriteStore;

    #[async_trait]
    impl DurableStore for BrokenWriteStore {
        async fn save(&self, _key: &CacheKey, _entry: &CacheEntry) {
            panic!("disk on fire");
        }
        async fn load(&self, _key: &CacheKey) -> Option<CacheEntry> {
            None
        }
        async fn remove(&self, _key: &CacheKey) {}
        async fn keys(&self) -> Vec<CacheKey> {
            Vec::new()
        }
        async fn clear_all(&self) {}
    }

    fn file_backed(dir: &tempfile::TempDir) -> (CacheService, Arc<FileStore>) {
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        (CacheService::hybrid(store.clone()), store)
    }

    #[tokio::test]
    async fn test_volatile_set_get_and_miss() {
        let cache = CacheService::volatile_only();
        let key = CacheKey::build("fmp", [("symbol", "AAPL")]);

        assert!(cache.get(&key).await.is_none());
        cache
            .set(&key, Some(json!(3.4e12)), 3_600_000, OutcomeKind::Success)
            .await;

        let entry = cache.get(&key).await.unwrap();
        assert_eq!(entry.value, Some(json!(3.4e12)));
        assert_eq!(entry.ttl_ms, 3_600_000);
        assert_eq!(entry.outcome, OutcomeKind::Success);

        let stats = cache.stats();
        assert_eq!(stats.volatile_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_no_data_entry_is_a_hit() {
        let cache = CacheService::volatile_only();
        let key = CacheKey::raw("fmp:ZZZZ");
        cache.set(&key, None, 300_000, OutcomeKind::NoData).await;

        let entry = cache.get(&key).await.unwrap();
        assert_eq!(entry.value, None);
        assert_eq!(entry.outcome, OutcomeKind::NoData);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_while_record_remains() {
        let cache = CacheService::volatile_only();
        let key = CacheKey::raw("short-lived");
        cache
            .set(&key, Some(json!(1)), 30, OutcomeKind::Success)
            .await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get(&key).await.is_none());
        assert!(cache.volatile().unwrap().has(&key).await);
    }

    #[tokio::test]
    async fn test_invalidate_volatile_only() {
        let cache = CacheService::volatile_only();
        let key = CacheKey::raw("fred_GDP");
        cache
            .set(&key, Some(json!(27.4e12)), 3_600_000, OutcomeKind::Success)
            .await;
        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_hybrid_with_pending_write() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = file_backed(&dir);
        let key = CacheKey::raw("fred_GDP");
        cache
            .set(&key, Some(json!(27.4e12)), 3_600_000, OutcomeKind::Success)
            .await;
        // No flush: the scheduled write must not resurrect the key.
        cache.invalidate(&key).await;

        assert!(cache.get(&key).await.is_none());
        assert!(store.load(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let cache = CacheService::volatile_only();
        let key = CacheKey::raw("census_5112");
        for _ in 0..2 {
            cache
                .set(&key, Some(json!(1.2e11)), 60_000, OutcomeKind::Success)
                .await;
        }
        let entry = cache.get(&key).await.unwrap();
        assert_eq!(entry.value, Some(json!(1.2e11)));
        assert_eq!(entry.ttl_ms, 60_000);
        assert_eq!(entry.outcome, OutcomeKind::Success);
        assert_eq!(cache.volatile().unwrap().len().await, 1);
    }

    #[tokio::test]
    async fn test_set_writes_through_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = file_backed(&dir);
        let key = CacheKey::raw("fmp_MSFT");
        cache
            .set(&key, Some(json!(3.1e12)), 3_600_000, OutcomeKind::Success)
            .await;
        cache.flush().await;

        let persisted = store.load(&key).await.unwrap();
        assert_eq!(persisted.value, Some(json!(3.1e12)));
    }

    #[tokio::test]
    async fn test_durable_hit_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = file_backed(&dir);
        let key = CacheKey::raw("bls_CES5000000001");
        let entry = CacheEntry::new(Some(json!(3_050_000)), 3_600_000, OutcomeKind::Success);
        store.save(&key, &entry).await;

        assert!(!cache.volatile().unwrap().has(&key).await);
        assert_eq!(cache.get(&key).await, Some(entry.clone()));
        assert_eq!(cache.volatile().unwrap().get(&key).await, Some(entry));

        // Second read is served from memory.
        assert!(cache.get(&key).await.is_some());
        let stats = cache.stats();
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.volatile_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_durable_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = file_backed(&dir);
        let key = CacheKey::raw("old");
        let mut entry = CacheEntry::new(Some(json!(1)), 1_000, OutcomeKind::Success);
        entry.stored_at -= chrono::TimeDelta::seconds(10);
        store.save(&key, &entry).await;

        assert!(cache.get(&key).await.is_none());
        assert!(!cache.volatile().unwrap().has(&key).await);
    }

    #[tokio::test]
    async fn test_durable_fallback_timeout() {
        let cache = CacheService::hybrid(Arc::new(HangingStore))
            .with_fallback_timeout(Duration::from_millis(1_000));
        let key = CacheKey::raw("fmp_AAPL");

        let started = Instant::now();
        assert!(cache.get(&key).await.is_none());
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(1_000));
        assert!(elapsed < Duration::from_secs(3));
        assert_eq!(cache.stats().durable_timeouts, 1);
    }

    #[tokio::test]
    async fn test_durable_write_failure_does_not_fail_set() {
        let cache = CacheService::hybrid(Arc::new(BrokenWriteStore));
        let key = CacheKey::raw("imf_WEO");
        cache
            .set(&key, Some(json!(105e12)), 3_600_000, OutcomeKind::Success)
            .await;
        cache.flush().await;
        assert_eq!(cache.get(&key).await.unwrap().value, Some(json!(105e12)));
    }

    #[tokio::test]
    async fn test_durable_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        let cache = CacheService::durable_only(store.clone());
        assert_eq!(cache.backend(), CacheBackend::Durable);

        let key = CacheKey::raw("world_bank_NY.GDP.MKTP.CD");
        cache
            .set(&key, Some(json!(1.0e14)), 3_600_000, OutcomeKind::Success)
            .await;
        assert!(store.load(&key).await.is_some());
        assert_eq!(cache.get(&key).await.unwrap().value, Some(json!(1.0e14)));

        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_pattern_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = file_backed(&dir);
        for (key, value) in [
            ("av_OVERVIEW_AAPL", 3.4e12),
            ("av_OVERVIEW_MSFT", 3.1e12),
            ("fred_GDP", 27.4e12),
        ] {
            cache
                .set(&CacheKey::raw(key), Some(json!(value)), 3_600_000, OutcomeKind::Success)
                .await;
        }

        cache.invalidate_pattern("av_OVERVIEW_").await;

        assert!(cache.get(&CacheKey::raw("av_OVERVIEW_AAPL")).await.is_none());
        assert!(cache.get(&CacheKey::raw("av_OVERVIEW_MSFT")).await.is_none());
        assert!(cache.get(&CacheKey::raw("fred_GDP")).await.is_some());
        assert_eq!(store.keys().await, vec![CacheKey::raw("fred_GDP")]);
    }

    #[tokio::test]
    async fn test_clear_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = file_backed(&dir);
        cache
            .set(&CacheKey::raw("a"), Some(json!(1)), 60_000, OutcomeKind::Success)
            .await;
        cache.set(&CacheKey::raw("b"), None, 60_000, OutcomeKind::NoData).await;
        cache.clear().await;

        assert!(cache.volatile().unwrap().is_empty().await);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_sibling_instances_receive_invalidations() {
        let dir = tempfile::tempdir().unwrap();
        let shared: Arc<dyn DurableStore> = Arc::new(FileStore::new(dir.path()).unwrap());
        let broadcaster: Arc<dyn InvalidationBroadcaster> = Arc::new(LocalBroadcaster::new());

        let a = Arc::new(
            CacheService::hybrid(shared.clone()).with_broadcaster(broadcaster.clone(), "node-a"),
        );
        let b = Arc::new(CacheService::hybrid(shared).with_broadcaster(broadcaster, "node-b"));
        let listener_a = a.listen_for_invalidations().unwrap();
        let listener_b = b.listen_for_invalidations().unwrap();

        let aapl = CacheKey::raw("av_OVERVIEW_AAPL");
        let gdp = CacheKey::raw("fred_GDP");
        for cache in [&a, &b] {
            cache
                .set(&aapl, Some(json!(3.4e12)), 3_600_000, OutcomeKind::Success)
                .await;
            cache
                .set(&gdp, Some(json!(27.4e12)), 3_600_000, OutcomeKind::Success)
                .await;
        }
        b.flush().await;

        a.invalidate_pattern("av_OVERVIEW_").await;

        let b_volatile = b.volatile().unwrap().clone();
        let purged = tokio::time::timeout(Duration::from_secs(1), async {
            while b_volatile.has(&aapl).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(purged.is_ok(), "sibling volatile tier was not purged");
        assert!(b_volatile.has(&gdp).await);
        assert!(b.get(&aapl).await.is_none());

        listener_a.abort();
        listener_b.abort();
    }

    #[tokio::test]
    async fn test_own_invalidation_is_ignored_by_listener() {
        let cache = CacheService::volatile_only()
            .with_broadcaster(Arc::new(LocalBroadcaster::new()), "self");
        let key = CacheKey::raw("k");
        cache.set(&key, Some(json!(1)), 60_000, OutcomeKind::Success).await;
        cache
            .apply_invalidation(&InvalidationMessage::key("self", &key))
            .await;
        assert!(cache.get(&key).await.is_some());
        cache
            .apply_invalidation(&InvalidationMessage::key("other", &key))
            .await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();

        let volatile = CacheService::from_config(&CacheConfig::volatile(), None).unwrap();
        assert_eq!(volatile.backend(), CacheBackend::Volatile);

        let files = CacheConfig::default()
            .with_storage(DurableMedium::Files, dir.path().join("records"))
            .with_instance_name("worker-1");
        let hybrid = CacheService::from_config(&files, None).unwrap();
        assert_eq!(hybrid.backend(), CacheBackend::Hybrid);
        assert_eq!(hybrid.instance(), "worker-1");

        let sqlite = CacheConfig::default()
            .with_backend(CacheBackend::Durable)
            .with_storage(DurableMedium::Sqlite, dir.path().join("db").join("cache.db"));
        let durable = CacheService::from_config(&sqlite, None).unwrap();
        assert_eq!(durable.backend(), CacheBackend::Durable);

        let distributed = CacheConfig::volatile().with_distributed_invalidation(true);
        assert!(matches!(
            CacheService::from_config(&distributed, None),
            Err(SizingError::Configuration(_))
        ));
        let with_broadcaster = CacheService::from_config(
            &distributed,
            Some(Arc::new(LocalBroadcaster::new())),
        )
        .unwrap();
        assert!(Arc::new(with_broadcaster).listen_for_invalidations().is_some());
    }
}
