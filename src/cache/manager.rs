//! Cache Manager Module
//!
//! Thread-safe front of a [`CacheStore`] that collapses concurrent requests
//! for the same key into a single upstream fetch.
//!
//! The store and the table of in-flight fetches share one lock, so the
//! sequence "check cache, check in-flight, register a new fetch" is a single
//! critical section. The leader's fetch runs in its own tokio task and keeps
//! going even if every caller waiting on it goes away.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, CacheStore};
use crate::error::FetchError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

// == Pending Request ==
/// In-flight fetch for one key.
struct Pending<V> {
    /// Identifies the fetch round that registered this entry
    round: u64,
    /// Outcome shared by every caller waiting on this round
    outcome: SharedFetch<V>,
}

struct State<V> {
    store: CacheStore<V>,
    pending: HashMap<String, Pending<V>>,
    next_round: u64,
}

struct Inner<V> {
    name: String,
    ttl: Duration,
    persistent: bool,
    state: Mutex<State<V>>,
}

// == Cache Manager ==
/// Named, deduplicating TTL cache.
///
/// Cloning is cheap and yields another handle to the same cache.
pub struct CacheManager<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .field("persistent", &self.inner.persistent)
            .finish()
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    // == Constructor ==
    /// Wraps `store` in a manager called `name`.
    pub fn new(name: impl Into<String>, store: CacheStore<V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                ttl: store.ttl(),
                persistent: store.is_persistent(),
                state: Mutex::new(State {
                    store,
                    pending: HashMap::new(),
                    next_round: 0,
                }),
            }),
        }
    }

    /// Creates a memory-only manager whose entries live for `ttl`.
    pub fn in_memory(name: impl Into<String>, ttl: Duration) -> Self {
        Self::new(name, CacheStore::new(ttl))
    }

    // == Accessors ==
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.persistent
    }

    // == Basic Operations ==
    /// Stores a value that expires one TTL from now.
    pub async fn set(&self, key: &str, value: V) {
        self.inner.state.lock().await.store.set(key, value);
    }

    /// Returns the fresh value for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.state.lock().await.store.get(key)
    }

    /// Returns true if `key` holds a fresh value.
    pub async fn has(&self, key: &str) -> bool {
        self.inner.state.lock().await.store.has(key)
    }

    /// Removes `key` from memory and mirror. Idempotent.
    pub async fn delete(&self, key: &str) {
        self.inner.state.lock().await.store.delete(key);
    }

    /// Removes every entry and forgets every in-flight fetch.
    ///
    /// Fetches already running still deliver their outcome to the callers
    /// waiting on them, but no longer populate the cache.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        let abandoned = state.pending.len();
        state.pending.clear();
        state.store.clear();
        info!(cache = %self.inner.name, abandoned, "Cache cleared");
    }

    /// Removes expired entries from memory and mirror.
    pub async fn sweep_expired(&self) -> usize {
        self.inner.state.lock().await.store.sweep_expired()
    }

    /// Returns current statistics, including the number of in-flight fetches.
    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock().await;
        let mut stats = state.store.stats();
        stats.set_in_flight(state.pending.len());
        stats
    }

    // == Deduplicate ==
    /// Returns the cached value for `key`, or fetches it exactly once.
    ///
    /// 1. A fresh cached value is returned without calling `fetch`.
    /// 2. If a fetch for `key` is already in flight, its outcome is awaited
    ///    and shared; `fetch` is not called.
    /// 3. Otherwise this call becomes the leader: `fetch` is invoked and its
    ///    handle registered before the lock is released. A success is cached;
    ///    a failure leaves the key absent so the next caller retries.
    ///
    /// The only error returned is the one produced by the fetch round. No
    /// timeout is applied: a fetch that never completes blocks every caller
    /// for that key.
    pub async fn deduplicate<F, Fut>(&self, key: &str, fetch: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let outcome = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;

            if let Some(value) = state.store.get(key) {
                return Ok(value);
            }

            match state.pending.get(key) {
                Some(pending) => {
                    debug!(cache = %self.inner.name, key, "Deduplicating request");
                    state.store.stats_mut().record_deduplicated();
                    pending.outcome.clone()
                }
                None => {
                    state.next_round += 1;
                    let round = state.next_round;
                    state.store.stats_mut().record_fetch();
                    debug!(cache = %self.inner.name, key, round, "Starting upstream fetch");

                    let outcome = self.spawn_fetch(key, round, fetch());
                    state.pending.insert(
                        key.to_string(),
                        Pending {
                            round,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };

        outcome.await
    }

    fn spawn_fetch<Fut>(&self, key: &str, round: u64, fetch: Fut) -> SharedFetch<V>
    where
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();

        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result.map_err(FetchError::from),
                Err(payload) => Err(FetchError::new(anyhow!(
                    "fetch panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            };
            inner.settle(&key, round, &result).await;
            result
        });

        async move {
            task.await
                .unwrap_or_else(|join_err| Err(FetchError::new(anyhow::Error::new(join_err))))
        }
        .boxed()
        .shared()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl<V> Inner<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Records the outcome of a fetch round.
    ///
    /// Only the round still registered for `key` may clear the pending entry
    /// and populate the cache; a round orphaned by `clear` just reports back.
    async fn settle(&self, key: &str, round: u64, result: &Result<V, FetchError>) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let current = state
            .pending
            .get(key)
            .is_some_and(|pending| pending.round == round);
        if current {
            state.pending.remove(key);
        }

        match result {
            Ok(value) if current => {
                state.store.set(key, value.clone());
            }
            Ok(_) => {
                debug!(cache = %self.name, key, round, "Discarding result of abandoned fetch");
            }
            Err(err) => {
                state.store.stats_mut().record_fetch_failure();
                warn!(cache = %self.name, key, round, error = %err, "Upstream fetch failed");
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, MemoryBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    fn manager_with_clock(ttl_ms: u64, clock: &ManualClock) -> CacheManager<u64> {
        let store = CacheStore::new(Duration::from_millis(ttl_ms)).with_clock(Arc::new(clock.clone()));
        CacheManager::new("test", store)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let clock = ManualClock::new(0);
        let cache = manager_with_clock(1_000, &clock);

        cache.set("x", 42).await;
        assert_eq!(cache.get("x").await, Some(42));
        assert!(cache.has("x").await);

        cache.delete("x").await;
        cache.delete("x").await;
        assert!(!cache.has("x").await);

        cache.set("y", 1).await;
        cache.clear().await;
        cache.clear().await;
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_ttl_scenario_with_deduplicated_refetch() {
        let clock = ManualClock::new(0);
        let cache = manager_with_clock(1_000, &clock);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set("x", 42).await;
        clock.set(500);
        assert_eq!(cache.get("x").await, Some(42));
        clock.set(1_500);
        assert_eq!(cache.get("x").await, None);

        let fetch = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<u64, anyhow::Error>(99)
            }
        };

        let first = cache.deduplicate("x", fetch(calls.clone()));
        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.deduplicate("x", fetch(calls.clone())).await
        };
        let (a, b) = tokio::join!(first, second);

        assert_eq!(assert_ok!(a), 99);
        assert_eq!(assert_ok!(b), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("x").await, Some(99));
    }

    #[tokio::test]
    async fn test_fresh_value_short_circuits_fetch() {
        let cache = CacheManager::in_memory("test", Duration::from_secs(60));
        cache.set("zero", 0u64).await;

        let value = cache
            .deduplicate("zero", || async { Err(anyhow!("must not be called")) })
            .await;

        // Falsy-looking values are still cache hits
        assert_eq!(assert_ok!(value), 0);
        assert_eq!(cache.stats().await.fetches, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache: CacheManager<String> = CacheManager::in_memory("test", Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..8).map(|_| {
            let calls = calls.clone();
            cache.deduplicate("leaderboard", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("snapshot".to_string())
            })
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(value) if value == "snapshot")));

        let stats = cache.stats().await;
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.deduplicated, 7);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_shared_and_not_cached() {
        let cache: CacheManager<u64> = CacheManager::in_memory("test", Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..3).map(|_| {
            let calls = calls.clone();
            cache.deduplicate("positions", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(anyhow!("API error: 500"))
            })
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let errors: Vec<FetchError> = results.into_iter().map(|r| assert_err!(r)).collect();
        assert!(errors.iter().all(|e| e.same_round(&errors[0])));
        assert_eq!(errors[0].to_string(), "API error: 500");

        assert!(!cache.has("positions").await);
        assert_eq!(cache.stats().await.fetch_failures, 1);

        let retried = cache.deduplicate("positions", || async { Ok(7) }).await;
        assert_eq!(assert_ok!(retried), 7);
        assert_eq!(cache.get("positions").await, Some(7));
    }

    async fn exploding_fetch() -> anyhow::Result<u64> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_fetch_does_not_poison_key() {
        let cache: CacheManager<u64> = CacheManager::in_memory("test", Duration::from_secs(60));

        let first = cache.deduplicate("k", exploding_fetch).await;
        let err = assert_err!(first);
        assert!(err.to_string().contains("boom"));

        let stats = cache.stats().await;
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.fetch_failures, 1);
        assert!(!cache.has("k").await);

        let second = cache.deduplicate("k", || async { Ok(1) }).await;
        assert_eq!(assert_ok!(second), 1);
        assert_eq!(cache.get("k").await, Some(1));
    }

    #[tokio::test]
    async fn test_fetch_survives_dropped_leader() {
        let cache: CacheManager<u64> = CacheManager::in_memory("test", Duration::from_secs(60));
        let (release, gate) = oneshot::channel::<()>();

        let leader = cache.deduplicate("k", move || async move {
            let _ = gate.await;
            Ok(5)
        });
        // Poll the leader once so it registers, then drop it
        let _ = tokio::time::timeout(Duration::from_millis(10), leader).await;

        let follower = cache.deduplicate("k", || async { Ok(0) });
        release.send(()).unwrap();

        assert_eq!(assert_ok!(follower.await), 5);
        assert_eq!(cache.stats().await.fetches, 1);
    }

    #[tokio::test]
    async fn test_clear_abandons_in_flight_fetch() {
        let cache: CacheManager<u64> = CacheManager::in_memory("test", Duration::from_secs(60));
        let (release, gate) = oneshot::channel::<()>();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .deduplicate("k", move || async move {
                        let _ = gate.await;
                        Ok(1)
                    })
                    .await
            })
        };
        while cache.stats().await.in_flight == 0 {
            tokio::task::yield_now().await;
        }

        cache.clear().await;
        assert_eq!(cache.stats().await.in_flight, 0);

        // A new round starts instead of joining the abandoned one
        let fresh = cache.deduplicate("k", || async { Ok(2) }).await;
        assert_eq!(assert_ok!(fresh), 2);

        release.send(()).unwrap();
        assert_eq!(assert_ok!(waiter.await.unwrap()), 1);
        assert_eq!(cache.get("k").await, Some(2));
    }

    #[tokio::test]
    async fn test_hanging_fetch_blocks_followers() {
        let cache: CacheManager<u64> = CacheManager::in_memory("test", Duration::from_secs(60));

        let leader = cache.deduplicate("stuck", || futures::future::pending::<anyhow::Result<u64>>());
        let _ = tokio::time::timeout(Duration::from_millis(10), leader).await;

        let follower = cache.deduplicate("stuck", || async { Ok(1) });
        let outcome = tokio::time::timeout(Duration::from_millis(50), follower).await;

        assert!(outcome.is_err(), "Follower should wait on the hanging fetch");
        assert_eq!(cache.stats().await.in_flight, 1);
    }

    #[tokio::test]
    async fn test_persistent_manager_round_trip() {
        let clock = ManualClock::new(0);
        let backend = MemoryBackend::new();
        let build = || {
            let store = CacheStore::new(Duration::from_millis(1_000))
                .with_clock(Arc::new(clock.clone()))
                .with_mirror(Arc::new(backend.clone()), "ns:");
            CacheManager::<u64>::new("ns", store)
        };

        let first = build();
        assert!(first.is_persistent());
        assert_ok!(first.deduplicate("k", || async { Ok(11) }).await);
        drop(first);

        clock.advance(900);
        let restarted = build();
        let value = restarted
            .deduplicate("k", || async { Err(anyhow!("should be served from mirror")) })
            .await;
        assert_eq!(assert_ok!(value), 11);

        clock.advance(100);
        assert!(!build().has("k").await);
    }
}
