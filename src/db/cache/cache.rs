use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};

use crate::models::{ItemId, ModelKind, UserId};

/// Identity of a memoized operation and its canonical arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Recommendations {
        user_id: UserId,
        n: usize,
        model: ModelKind,
    },
    Prediction {
        user_id: UserId,
        item_id: ItemId,
        model: ModelKind,
    },
    Comparison {
        user_id: UserId,
        n: usize,
    },
}

impl CacheKey {
    /// User whose ratings the cached value depends on
    pub fn user_id(&self) -> UserId {
        match self {
            CacheKey::Recommendations { user_id, .. }
            | CacheKey::Prediction { user_id, .. }
            | CacheKey::Comparison { user_id, .. } => *user_id,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Recommendations { user_id, n, model } => {
                write!(f, "recs:{}:{}:{}", user_id, n, model)
            }
            CacheKey::Prediction {
                user_id,
                item_id,
                model,
            } => write!(f, "predict:{}:{}:{}", user_id, item_id, model),
            CacheKey::Comparison { user_id, n } => write!(f, "compare:{}:{}", user_id, n),
        }
    }
}

/// Which entries an invalidation removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    All,
    User(UserId),
}

/// Counters reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheEntry {
    payload: String,
    created_at: Instant,
}

/// In-process memoization store with a freshness timeout.
///
/// Values are kept as serialized JSON so a hit hands back an owned copy,
/// identical byte for byte to what was stored. Every invalidation bumps a
/// generation counter; a value computed under an older generation is dropped
/// instead of stored.
#[derive(Clone)]
pub struct MemoCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    timeout: Duration,
    generation: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

/// Handle for stopping the background sweep
pub struct CacheSweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl CacheSweeperHandle {
    /// Signals the sweeper and waits for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache sweeper task failed");
        }
        tracing::info!("Cache sweeper stopped");
    }
}

impl MemoCache {
    /// Creates an empty cache whose entries are served for `timeout` after creation
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            timeout,
            generation: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the stored value if it was created less than `timeout` ago
    pub fn get_fresh<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        // The map guard must be released before any removal below.
        let payload = match self.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < self.timeout => Some(entry.payload.clone()),
            _ => None,
        };

        let Some(payload) = payload else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "Cache miss");
            return None;
        };

        match serde_json::from_str(&payload) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of invalidations so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores a value, replacing any previous entry for the key
    pub fn insert<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if let Some(payload) = Self::serialize(key, value) {
            self.entries.insert(
                key.clone(),
                CacheEntry {
                    payload,
                    created_at: Instant::now(),
                },
            );
        }
    }

    /// Stores a value only if no invalidation happened since `generation` was
    /// read. Returns whether the value was stored.
    pub fn insert_if_current<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        generation: u64,
    ) -> bool {
        let Some(payload) = Self::serialize(key, value) else {
            return false;
        };

        // The shard lock is held across the check so a concurrent invalidation
        // either bumps first or removes this entry afterwards.
        let entry = self.entries.entry(key.clone());
        if self.generation() != generation {
            tracing::debug!(key = %key, "Discarding value computed before invalidation");
            return false;
        }
        entry.insert(CacheEntry {
            payload,
            created_at: Instant::now(),
        });
        true
    }

    fn serialize<T: Serialize>(key: &CacheKey, value: &T) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Cache serialization error");
                None
            }
        }
    }

    /// Removes every entry in scope, returning how many were removed
    pub fn invalidate(&self, scope: InvalidationScope) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = match scope {
                InvalidationScope::All => false,
                InvalidationScope::User(user_id) => key.user_id() != user_id,
            };
            if !keep {
                removed += 1;
            }
            keep
        });

        tracing::info!(?scope, removed, "Cache invalidated");
        removed
    }

    /// Removes entries older than `retention`, returning how many were removed
    pub fn sweep(&self, retention: Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.created_at.elapsed() < retention;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Spawns the periodic sweep that enforces the retention ceiling
    pub fn spawn_sweeper(&self, interval: Duration, retention: Duration) -> CacheSweeperHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let cache = self.clone();
        let task = tokio::spawn(async move {
            Self::sweeper_task(cache, interval, retention, shutdown_rx).await;
        });

        CacheSweeperHandle { shutdown_tx, task }
    }

    async fn sweeper_task(
        cache: MemoCache,
        interval: Duration,
        retention: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            retention_secs = retention.as_secs(),
            "Cache sweeper started"
        );
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep(retention);
                    if removed > 0 {
                        tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(remaining = cache.len(), "Cache sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppResult, RecError};
    use std::sync::atomic::AtomicUsize;

    fn recs_key(user_id: UserId) -> CacheKey {
        CacheKey::Recommendations {
            user_id,
            n: 10,
            model: ModelKind::Ensemble,
        }
    }

    #[test]
    fn test_cache_key_display_recommendations() {
        assert_eq!(format!("{}", recs_key(7)), "recs:7:10:ensemble");
    }

    #[test]
    fn test_cache_key_display_prediction() {
        let key = CacheKey::Prediction {
            user_id: 1,
            item_id: 50,
            model: ModelKind::ItemKnn,
        };
        assert_eq!(format!("{}", key), "predict:1:50:item_knn");
    }

    #[test]
    fn test_cache_key_display_comparison() {
        let key = CacheKey::Comparison { user_id: 3, n: 5 };
        assert_eq!(format!("{}", key), "compare:3:5");
        assert_eq!(key.user_id(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_timeout_and_miss_after() {
        let cache = MemoCache::new(Duration::from_secs(300));
        cache.insert(&recs_key(1), &vec![1, 2, 3]);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get_fresh::<Vec<i32>>(&recs_key(1)), Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_fresh::<Vec<i32>>(&recs_key(1)), None);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );
    }

    #[tokio::test]
    async fn test_invalidate_user_scope() {
        let cache = MemoCache::new(Duration::from_secs(300));
        cache.insert(&recs_key(1), &"a");
        cache.insert(&CacheKey::Comparison { user_id: 1, n: 10 }, &"b");
        cache.insert(&recs_key(2), &"c");

        assert_eq!(cache.invalidate(InvalidationScope::User(1)), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_fresh::<String>(&recs_key(2)).is_some());

        assert_eq!(cache.invalidate(InvalidationScope::All), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = MemoCache::new(Duration::from_secs(300));
        cache.insert(&recs_key(1), &1);
        tokio::time::advance(Duration::from_secs(1000)).await;
        cache.insert(&recs_key(2), &2);

        assert_eq!(cache.sweep(Duration::from_secs(1800)), 0);
        tokio::time::advance(Duration::from_secs(800)).await;
        assert_eq!(cache.sweep(Duration::from_secs(1800)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let cache = MemoCache::new(Duration::from_secs(300));
        let handle = cache.spawn_sweeper(Duration::from_secs(60), Duration::from_secs(100));
        cache.insert(&recs_key(1), &1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(cache.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_insert_after_invalidation_is_discarded() {
        let cache = MemoCache::new(Duration::from_secs(300));
        let generation = cache.generation();
        cache.invalidate(InvalidationScope::User(1));

        assert!(!cache.insert_if_current(&recs_key(1), &vec![1], generation));
        assert!(cache.is_empty());
        assert!(cache.insert_if_current(&recs_key(1), &vec![1], cache.generation()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memoized_skips_store_when_invalidated_mid_compute() {
        let cache = MemoCache::new(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        let value = tokio_test::assert_ok!(invalidated_mid_compute(&cache, &calls).await);
        assert_eq!(value, vec![4, 2]);
        assert!(cache.is_empty());

        tokio_test::assert_ok!(memoized_compute(&cache, &calls, false).await);
        assert_eq!(cache.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    async fn compute(calls: &AtomicUsize, fail: bool) -> AppResult<Vec<i64>> {
        calls.fetch_add(1, Ordering::SeqCst);
        if fail {
            Err(RecError::EmptyDataset.into())
        } else {
            Ok(vec![4, 2])
        }
    }

    async fn memoized_compute(
        cache: &MemoCache,
        calls: &AtomicUsize,
        fail: bool,
    ) -> AppResult<Vec<i64>> {
        crate::memoized!(cache, recs_key(1), compute(calls, fail))
    }

    async fn invalidated_mid_compute(cache: &MemoCache, calls: &AtomicUsize) -> AppResult<Vec<i64>> {
        crate::memoized!(cache, recs_key(1), async {
            let value = compute(calls, false).await;
            cache.invalidate(InvalidationScope::All);
            value
        })
    }

    #[tokio::test]
    async fn test_memoized_computes_once() {
        let cache = MemoCache::new(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        let first = tokio_test::assert_ok!(memoized_compute(&cache, &calls, false).await);
        let second = tokio_test::assert_ok!(memoized_compute(&cache, &calls, false).await);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memoized_does_not_store_errors() {
        let cache = MemoCache::new(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        tokio_test::assert_err!(memoized_compute(&cache, &calls, true).await);
        assert!(cache.is_empty());
        tokio_test::assert_ok!(memoized_compute(&cache, &calls, false).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
