//! Bounded LRU cache with per-entry expiry.
//!
//! [`LruCache`] is the single-threaded O(1) structure: a hash map from key
//! to slot plus an intrusive doubly linked recency list stored in a slab.
//! [`TtlCache`] wraps it for shared use across tasks, adds hit/miss
//! statistics and collapses concurrent fetches for the same key.
//!
//! Expired entries are treated as absent on read; they are only swept
//! eagerly by [`TtlCache::purge_expired`].
//!
//! An invalidation that lands while a fetch for the same key is in flight
//! wins: the fetched value is handed to its callers but not stored.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    expires_at: Instant,
    /// Towards the most recently used end.
    prev: Option<usize>,
    /// Towards the least recently used end.
    next: Option<usize>,
}

/// Fixed-capacity map with least-recently-used eviction and expiry.
#[derive(Debug)]
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: NonZeroUsize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity.get()),
            slots: Vec::with_capacity(capacity.get()),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Look up `key` as of `now`.
    ///
    /// A live entry becomes the most recently used. An expired entry is
    /// dropped and reported as a miss.
    pub fn get<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        if self.node(idx).expires_at <= now {
            self.remove_slot(idx);
            return None;
        }
        self.detach(idx);
        self.push_front(idx);
        Some(&self.node(idx).value)
    }

    /// Read without touching recency or removing expired entries.
    pub fn peek<Q>(&self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let node = self.node(*self.map.get(key)?);
        (node.expires_at > now).then_some(&node.value)
    }

    /// Insert or replace `key`, making it the most recently used.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// used entry, expired or not, and returns it.
    pub fn insert(&mut self, key: K, value: V, expires_at: Instant) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            let node = self.node_mut(idx);
            node.value = value;
            node.expires_at = expires_at;
            self.detach(idx);
            self.push_front(idx);
            return None;
        }

        let evicted = match self.tail {
            Some(idx) if self.map.len() >= self.capacity.get() => Some(self.remove_slot(idx)),
            _ => None,
        };

        let node = Node {
            key: key.clone(),
            value,
            expires_at,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        Some(self.remove_slot(idx).1)
    }

    /// Keep only entries for which `keep(key, expires_at)` is true.
    /// Returns the number of entries removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, Instant) -> bool) -> usize {
        let doomed: Vec<usize> = self
            .map
            .values()
            .copied()
            .filter(|&idx| {
                let node = self.node(idx);
                !keep(&node.key, node.expires_at)
            })
            .collect();
        for &idx in &doomed {
            self.remove_slot(idx);
        }
        doomed.len()
    }

    pub fn count_expired(&self, now: Instant) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|node| node.expires_at <= now)
            .count()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        std::iter::successors(self.head, |&idx| self.node(idx).next).map(|idx| &self.node(idx).key)
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        match &self.slots[idx] {
            Some(node) => node,
            None => unreachable!("lru slot {idx} is linked but vacant"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        match &mut self.slots[idx] {
            Some(node) => node,
            None => unreachable!("lru slot {idx} is linked but vacant"),
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn remove_slot(&mut self, idx: usize) -> (K, V) {
        self.detach(idx);
        let node = match self.slots[idx].take() {
            Some(node) => node,
            None => unreachable!("lru slot {idx} is linked but vacant"),
        };
        self.map.remove(&node.key);
        self.free.push(idx);
        (node.key, node.value)
    }
}

/// Counters and occupancy reported by [`TtlCache::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: LruCache<String, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Shared string-keyed cache with a default TTL.
///
/// Callers supply fully-qualified keys (e.g. `conversation:{id}:messages`);
/// the cache does not scope keys itself.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Mutex<CacheInner<V>>,
    default_ttl: Duration,
    fetch_locks: DashMap<String, Arc<FetchLock>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: NonZeroUsize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            default_ttl,
            fetch_locks: DashMap::new(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let found = inner.entries.get(key, Instant::now()).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut inner = self.lock();
        if let Some((evicted, _)) = inner.entries.insert(key.into(), value, expires_at) {
            inner.evictions += 1;
            tracing::trace!(key = %evicted, "cache eviction");
        }
    }

    /// Returns whether an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        if let Some(pending) = self.fetch_locks.get(key) {
            pending.invalidations.fetch_add(1, Ordering::SeqCst);
        }
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.mark_pending(|key| key.starts_with(prefix));
        let removed = self.lock().entries.retain(|key, _| !key.starts_with(prefix));
        if removed > 0 {
            tracing::debug!(prefix, removed, "cache entries invalidated");
        }
        removed
    }

    /// Eagerly remove expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.lock().entries.retain(|_, expires_at| expires_at > now);
        if removed > 0 {
            tracing::debug!(removed, "expired cache entries purged");
        }
        removed
    }

    pub fn clear(&self) {
        self.mark_pending(|_| true);
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.entries.len();
        let expired = inner.entries.count_expired(Instant::now());
        let lookups = inner.hits + inner.misses;
        CacheStats {
            total_entries: total,
            active_entries: total - expired,
            expired_entries: expired,
            capacity: inner.entries.capacity(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }

    /// Return the cached value for `key`, or run `fetch` and cache its
    /// result for `ttl` (the default TTL when `None`).
    ///
    /// Concurrent callers for the same key wait for a single fetch instead
    /// of all hitting the downstream dependency. Errors are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let slot = FetchSlot::new(&self.fetch_locks, key);
        let _held = slot.lock.mutex.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(value) = self.peek(key) {
            return Ok(value);
        }

        let seen = slot.lock.invalidations.load(Ordering::SeqCst);
        let value = fetch().await?;
        self.fill(key, value.clone(), ttl.unwrap_or(self.default_ttl), &slot.lock, seen);
        Ok(value)
    }

    /// Store a fetched value unless `key` was invalidated since `seen`.
    ///
    /// Invalidators bump the counter before taking the entry lock, so the
    /// check and the insert must happen under that lock.
    fn fill(&self, key: &str, value: V, ttl: Duration, pending: &FetchLock, seen: u64) {
        let expires_at = Instant::now() + ttl;
        let mut inner = self.lock();
        if pending.invalidations.load(Ordering::SeqCst) != seen {
            tracing::debug!(key, "cache fill skipped, key invalidated during fetch");
            return;
        }
        if let Some((evicted, _)) = inner.entries.insert(key.to_string(), value, expires_at) {
            inner.evictions += 1;
            tracing::trace!(key = %evicted, "cache eviction");
        }
    }

    fn mark_pending(&self, mut matches: impl FnMut(&str) -> bool) {
        for pending in self.fetch_locks.iter() {
            if matches(pending.key().as_str()) {
                pending.value().invalidations.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn peek(&self, key: &str) -> Option<V> {
        self.lock().entries.peek(key, Instant::now()).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct FetchLock {
    mutex: tokio::sync::Mutex<()>,
    /// Bumped by every invalidation touching the key.
    invalidations: AtomicU64,
}

/// Per-key fetch lock, removed from the map once nobody else holds it.
///
/// Cleanup runs on drop so an abandoned fetch does not leak the entry.
struct FetchSlot<'a> {
    locks: &'a DashMap<String, Arc<FetchLock>>,
    key: String,
    lock: Arc<FetchLock>,
}

impl<'a> FetchSlot<'a> {
    fn new(locks: &'a DashMap<String, Arc<FetchLock>>, key: &str) -> Self {
        let lock = Arc::clone(locks.entry(key.to_string()).or_default().value());
        Self {
            locks,
            key: key.to_string(),
            lock,
        }
    }
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        // Two references left means only the map and this slot: no waiters.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use tokio::sync::oneshot;

    use super::*;

    /// Start a fetch for `key` that completes with `value` once the
    /// returned sender fires.
    fn pending_fetch(
        c: &Arc<TtlCache<String>>,
        key: &'static str,
        value: &'static str,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<Result<String, String>>) {
        let (release, released) = oneshot::channel::<()>();
        let c = Arc::clone(c);
        let task = tokio::spawn(async move {
            c.get_or_try_insert_with(key, None, move || async move {
                let _ = released.await;
                Ok::<_, String>(value.to_string())
            })
            .await
        });
        (release, task)
    }

    fn lru(capacity: usize) -> LruCache<&'static str, u32> {
        LruCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    fn cache(capacity: usize, ttl_secs: u64) -> TtlCache<String> {
        TtlCache::new(
            NonZeroUsize::new(capacity).unwrap(),
            Duration::from_secs(ttl_secs),
        )
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let mut c = lru(2);
        let exp = far_future();
        c.insert("a", 1, exp);
        c.insert("b", 2, exp);
        let evicted = c.insert("c", 3, exp);

        assert_eq!(evicted, Some(("a", 1)));
        assert_eq!(c.len(), 2);
        assert!(c.peek("a", Instant::now()).is_none());
    }

    #[test]
    fn test_lru_read_promotes() {
        let mut c = lru(2);
        let now = Instant::now();
        let exp = far_future();
        c.insert("a", 1, exp);
        c.insert("b", 2, exp);
        assert_eq!(c.get("b", now), Some(&2));

        // B was already the most recent; A is still the eviction candidate.
        assert_eq!(c.insert("c", 3, exp), Some(("a", 1)));
        // Now C is most recent, so B goes next.
        assert_eq!(c.insert("d", 4, exp), Some(("b", 2)));
        assert_eq!(c.keys().copied().collect::<Vec<_>>(), vec!["d", "c"]);
    }

    #[test]
    fn test_lru_read_of_oldest_changes_victim() {
        let mut c = lru(2);
        let exp = far_future();
        c.insert("a", 1, exp);
        c.insert("b", 2, exp);
        c.get("a", Instant::now());
        assert_eq!(c.insert("c", 3, exp), Some(("b", 2)));
    }

    #[test]
    fn test_lru_update_does_not_evict() {
        let mut c = lru(2);
        let exp = far_future();
        c.insert("a", 1, exp);
        c.insert("b", 2, exp);
        assert_eq!(c.insert("a", 10, exp), None);
        assert_eq!(c.len(), 2);
        assert_eq!(c.insert("c", 3, exp), Some(("b", 2)));
        assert_eq!(c.peek("a", Instant::now()), Some(&10));
    }

    #[test]
    fn test_lru_evicts_lru_even_when_others_expired() {
        let mut c = lru(2);
        let now = Instant::now();
        c.insert("a", 1, far_future());
        c.insert("b", 2, now);
        // "b" is expired but "a" is the least recently used.
        assert_eq!(c.insert("c", 3, far_future()), Some(("a", 1)));
    }

    #[test]
    fn test_lru_reuses_slots() {
        let mut c = lru(3);
        let exp = far_future();
        for i in 0..100u32 {
            let key: &'static str = ["x", "y", "z", "w"][(i % 4) as usize];
            c.insert(key, i, exp);
        }
        assert_eq!(c.len(), 3);
        assert!(c.slots.len() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let c = cache(10, 5);
        c.set("k", "v".to_string());
        assert_eq!(c.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(c.get("k"), None);
        assert_eq!(c.len(), 0, "expired entry is dropped on read");

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let c = cache(10, 300);
        c.set_with_ttl("short", "1".to_string(), Duration::from_secs(1));
        c.set("long", "2".to_string());

        tokio::time::advance(Duration::from_secs(2)).await;
        let stats = c.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.active_entries, 1);

        assert_eq!(c.purge_expired(), 1);
        assert_eq!(c.get("long").as_deref(), Some("2"));
    }

    #[test]
    fn test_invalidate_and_prefix() {
        let c = cache(10, 60);
        c.set("conversation:1:messages", "a".to_string());
        c.set("conversation:1:summary", "b".to_string());
        c.set("conversation:2:messages", "c".to_string());

        assert!(c.invalidate("conversation:2:messages"));
        assert!(!c.invalidate("conversation:2:messages"));
        assert_eq!(c.invalidate_prefix("conversation:1:"), 2);
        assert!(c.is_empty());
    }

    #[test]
    fn test_stats_count_evictions() {
        let c = cache(2, 60);
        c.set("a", "1".to_string());
        c.set("b", "2".to_string());
        c.set("c", "3".to_string());
        c.get("c");
        c.get("a");

        let stats = c.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.evictions, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

        c.clear();
        assert_eq!(c.len(), 0);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_caches_success() {
        let c = cache(10, 60);
        let fetches = AtomicU32::new(0);

        for _ in 0..3 {
            let v = c
                .get_or_try_insert_with("k", None, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("loaded".to_string())
                })
                .await
                .unwrap();
            assert_eq!(v, "loaded");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(c.fetch_locks.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_does_not_cache_errors() {
        let c = cache(10, 60);
        let err = c
            .get_or_try_insert_with("k", None, || async { Err::<String, _>("down") })
            .await
            .unwrap_err();
        assert_eq!(err, "down");
        assert!(c.is_empty());
        assert!(c.fetch_locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_collapse() {
        let c = Arc::new(cache(10, 60));
        let fetches = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&c);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                c.get_or_try_insert_with("hot", None, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>("value".to_string())
                })
                .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "value");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(c.fetch_locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_releases_lock() {
        let c = Arc::new(cache(10, 60));
        let task = {
            let c = Arc::clone(&c);
            tokio::spawn(async move {
                c.get_or_try_insert_with("k", None, || std::future::pending::<Result<String, String>>())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(c.fetch_locks.len(), 1);

        task.abort();
        let _ = task.await;
        assert!(c.fetch_locks.is_empty());

        let v = c
            .get_or_try_insert_with("k", None, || async { Ok::<_, String>("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(v, "ok");
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_discards_stale_value() {
        let c = Arc::new(cache(10, 60));
        let (release, task) = pending_fetch(&c, "conversation:1:messages", "history-v1");
        tokio::task::yield_now().await;
        assert_eq!(c.fetch_locks.len(), 1, "fetch is in flight");

        // A write lands and invalidates while the old read is still running.
        assert!(!c.invalidate("conversation:1:messages"));
        release.send(()).unwrap();

        assert_eq!(task.await.unwrap().unwrap(), "history-v1");
        assert_eq!(c.get("conversation:1:messages"), None);
        assert!(c.is_empty());

        // The next read fetches fresh data and caches it.
        let v = c
            .get_or_try_insert_with("conversation:1:messages", None, || async {
                Ok::<_, String>("history-v2".to_string())
            })
            .await
            .unwrap();
        assert_eq!(v, "history-v2");
        assert_eq!(c.get("conversation:1:messages").as_deref(), Some("history-v2"));
    }

    #[tokio::test]
    async fn test_prefix_invalidation_and_clear_during_fetch() {
        let c = Arc::new(cache(10, 60));
        let (release_a, task_a) = pending_fetch(&c, "conversation:1:messages", "a");
        let (release_b, task_b) = pending_fetch(&c, "conversation:2:messages", "b");
        tokio::task::yield_now().await;

        c.invalidate_prefix("conversation:1:");
        release_a.send(()).unwrap();
        release_b.send(()).unwrap();
        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();

        assert_eq!(c.get("conversation:1:messages"), None);
        assert_eq!(c.get("conversation:2:messages").as_deref(), Some("b"), "other keys still fill");

        let (release, task) = pending_fetch(&c, "conversation:3:messages", "c");
        tokio::task::yield_now().await;
        c.clear();
        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_invalidating_another_key_does_not_block_fill() {
        let c = Arc::new(cache(10, 60));
        let (release, task) = pending_fetch(&c, "conversation:1:messages", "a");
        tokio::task::yield_now().await;

        c.invalidate("conversation:9:messages");
        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(c.get("conversation:1:messages").as_deref(), Some("a"));
    }
}
