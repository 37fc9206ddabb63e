//! In-memory query cache with request de-duplication.
//!
//! Every [CacheKey] maps to at most one settled result and at most one
//! pending fetch. Callers asking for a key that is being fetched attach to
//! the pending fetch instead of issuing another request.
//!
//! Each fetch is stamped with a generation. A finished fetch only writes its
//! result if its generation is still the entry's current one, so a fetch
//! superseded by an invalidation can never overwrite newer data.
//!
//! Entries nobody is fetching are dropped once their data is older than the
//! cache's GC time (and their own freshness window). Collection runs on
//! every [QueryCache::fetch] and on [QueryCache::gc].

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::debug;

use crate::error::HubClientError;
use crate::keys::{CacheKey, KeyFilter};

/// Errors are shared between every caller attached to the same fetch.
pub type QueryError = Arc<HubClientError>;

pub type QueryResult<V> = Result<V, QueryError>;

/// How long unused data is kept after it was fetched.
pub const GC_TIME: Duration = Duration::from_secs(5 * 60);

type SharedFetch<V> = Shared<BoxFuture<'static, QueryResult<V>>>;

struct Settled<V> {
    data: V,
    fetched_at: Instant,
}

struct Pending<V> {
    generation: u64,
    fetch: SharedFetch<V>,
}

struct Entry<V> {
    settled: Option<Settled<V>>,
    pending: Option<Pending<V>>,
    /// Longest freshness window requested by any caller of the latest fetch.
    stale_time: Duration,
    generation: u64,
    invalidated: bool,
}

impl<V> Entry<V> {
    fn is_retained(&self, now: Instant, gc_time: Duration) -> bool {
        if self.pending.is_some() {
            return true;
        }
        self.settled.as_ref().is_some_and(|settled| {
            now.duration_since(settled.fetched_at) < gc_time.max(self.stale_time)
        })
    }
}

impl<V: Clone> Entry<V> {
    fn fresh_data(&self, now: Instant, stale_time: Duration) -> Option<V> {
        if self.invalidated {
            return None;
        }
        let settled = self.settled.as_ref()?;
        let window = self.stale_time.max(stale_time);
        (now.duration_since(settled.fetched_at) < window).then(|| settled.data.clone())
    }
}

struct Store<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    next_generation: u64,
    gc_time: Duration,
}

impl<V> Store<V> {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn collect_garbage(&mut self, now: Instant) -> usize {
        let gc_time = self.gc_time;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_retained(now, gc_time));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "collected unused cache entries");
        }
        removed
    }
}

/// A cache of query results of type `V`.
///
/// Cloning yields another handle to the same store. Values are replaced,
/// never mutated in place, so `V` is usually an `Arc` snapshot.
pub struct QueryCache<V> {
    store: Arc<Mutex<Store<V>>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<V> Default for QueryCache<V> {
    fn default() -> Self {
        Self::with_gc_time(GC_TIME)
    }
}

impl<V> QueryCache<V> {
    /// A cache that drops unused data `gc_time` after it was fetched.
    pub fn with_gc_time(gc_time: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                entries: HashMap::new(),
                next_generation: 0,
                gc_time,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store<V>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys with data or a pending fetch.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries that are not being fetched and whose data has outlived
    /// both the GC time and its freshness window.
    ///
    /// Returns the number of dropped entries.
    pub fn gc(&self) -> usize {
        self.lock().collect_garbage(Instant::now())
    }
}

impl<V> Debug for QueryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.lock().entries.len())
            .finish_non_exhaustive()
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the result for `key`.
    ///
    /// Data younger than `stale_time` is returned without calling `fetcher`.
    /// If a fetch for `key` is already running, its result is awaited
    /// instead. Otherwise `fetcher` starts a new fetch.
    ///
    /// `fetcher` is called when the fetch is first polled, outside the cache's
    /// lock, so it may use this cache itself.
    pub async fn fetch<F>(&self, key: CacheKey, stale_time: Duration, fetcher: F) -> QueryResult<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, HubClientError>> + Send + 'static,
    {
        let fetch = {
            let mut store = self.lock();
            let now = Instant::now();
            store.collect_garbage(now);

            let existing = store.entries.get_mut(&key).and_then(|entry| {
                if let Some(pending) = &entry.pending {
                    entry.stale_time = entry.stale_time.max(stale_time);
                    debug!(%key, generation = pending.generation, "joining pending fetch");
                    return Some(Err(pending.fetch.clone()));
                }
                entry.fresh_data(now, stale_time).map(Ok)
            });

            match existing {
                Some(Ok(data)) => {
                    debug!(%key, "serving fresh data from cache");
                    return Ok(data);
                },
                Some(Err(pending)) => pending,
                None => {
                    let generation = store.next_generation();
                    let fetch = self.start_fetch(key.clone(), generation, fetcher);
                    let entry = store.entries.entry(key.clone()).or_insert(Entry {
                        settled: None,
                        pending: None,
                        stale_time,
                        generation,
                        invalidated: false,
                    });
                    entry.generation = generation;
                    entry.stale_time = stale_time;
                    entry.pending = Some(Pending {
                        generation,
                        fetch: fetch.clone(),
                    });
                    debug!(%key, generation, "starting fetch");
                    fetch
                },
            }
        };

        fetch.await
    }

    /// Wraps `fetcher` so that its outcome is recorded exactly once, by
    /// whichever caller drives it to completion.
    fn start_fetch<F>(&self, key: CacheKey, generation: u64, fetcher: F) -> SharedFetch<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, HubClientError>> + Send + 'static,
    {
        let cache = self.clone();
        async move {
            let result = fetcher().await.map_err(Arc::new);
            cache.settle(&key, generation, &result);
            result
        }
        .boxed()
        .shared()
    }

    fn settle(&self, key: &CacheKey, generation: u64, result: &QueryResult<V>) {
        let mut store = self.lock();
        let Some(entry) = store.entries.get_mut(key) else {
            debug!(%key, generation, "discarding result for evicted key");
            return;
        };
        if entry.generation != generation {
            debug!(
                %key,
                generation,
                current = entry.generation,
                "discarding result of superseded fetch"
            );
            return;
        }

        entry.pending = None;
        match result {
            Ok(data) => {
                entry.settled = Some(Settled {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                });
                entry.invalidated = false;
            },
            // Errors are not cached; the next request fetches again.
            Err(err) => debug!(%key, generation, error = %err, "fetch failed"),
        }
    }

    /// The last settled data for `key`, fresh or not.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.lock()
            .entries
            .get(key)
            .and_then(|entry| entry.settled.as_ref())
            .map(|settled| settled.data.clone())
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.pending.is_some())
    }

    /// Mark every matching entry stale and detach pending fetches from it.
    ///
    /// Callers already waiting on a detached fetch still receive its result,
    /// but the result is not stored. Returns the number of matching entries.
    pub fn invalidate(&self, namespace: &str, filter: &KeyFilter) -> usize {
        let mut store = self.lock();
        let keys = store
            .entries
            .keys()
            .filter(|key| filter.matches(namespace, key))
            .cloned()
            .collect::<Vec<_>>();

        for key in &keys {
            let generation = store.next_generation();
            if let Some(entry) = store.entries.get_mut(key) {
                entry.invalidated = true;
                entry.pending = None;
                entry.generation = generation;
            }
        }
        debug!(?filter, n_keys = keys.len(), "invalidated cache entries");
        keys.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    use super::*;
    use crate::keys::{ENTRIES_STALE_TIME, KeyScheme, TAGS_STALE_TIME};
    use crate::types::ListParams;

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, HubClientError>> + Send + use<> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_fetch() {
        let cache = QueryCache::new();
        let key = KeyScheme::default().entry_list(&ListParams::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, second) = tokio::join!(
            cache.fetch(key.clone(), ENTRIES_STALE_TIME, counting_fetcher(&calls, 1)),
            cache.fetch(key.clone(), ENTRIES_STALE_TIME, counting_fetcher(&calls, 2)),
        );

        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_fetching(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_data_is_served_until_stale() {
        let cache = QueryCache::new();
        let key = KeyScheme::default().tags();
        let calls = Arc::new(AtomicUsize::new(0));

        let value = cache
            .fetch(key.clone(), TAGS_STALE_TIME, counting_fetcher(&calls, 1))
            .await;
        assert_eq!(value.unwrap(), 1);

        tokio::time::advance(TAGS_STALE_TIME - Duration::from_secs(1)).await;
        let value = cache
            .fetch(key.clone(), TAGS_STALE_TIME, counting_fetcher(&calls, 2))
            .await;
        assert_eq!(value.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let value = cache
            .fetch(key.clone(), TAGS_STALE_TIME, counting_fetcher(&calls, 3))
            .await;
        assert_eq!(value.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_fetch_keeps_longest_stale_time() {
        let cache = QueryCache::new();
        let key = KeyScheme::default().tags();
        let calls = Arc::new(AtomicUsize::new(0));

        let (short, long) = tokio::join!(
            cache.fetch(key.clone(), Duration::from_secs(1), counting_fetcher(&calls, 1)),
            cache.fetch(key.clone(), Duration::from_secs(30), counting_fetcher(&calls, 2)),
        );
        assert_eq!((short.unwrap(), long.unwrap()), (1, 1));

        tokio::time::advance(Duration::from_secs(10)).await;
        let value = cache
            .fetch(key.clone(), Duration::from_secs(1), counting_fetcher(&calls, 3))
            .await;
        assert_eq!(value.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: QueryCache<u32> = QueryCache::new();
        let key = KeyScheme::default().tags();

        let err = cache
            .fetch(key.clone(), TAGS_STALE_TIME, || {
                async { Err(HubClientError::Validation("boom".into())) }.boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(cache.get(&key), None);

        let value = cache
            .fetch(key.clone(), TAGS_STALE_TIME, || async { Ok(7) }.boxed())
            .await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn superseded_fetch_does_not_overwrite_newer_result() {
        let cache: QueryCache<&'static str> = QueryCache::new();
        let keys = KeyScheme::default();
        let key = keys.entry_detail("pi-hole-gateway");

        let (release_old, old_response) = oneshot::channel::<()>();
        let old = cache.fetch(key.clone(), ENTRIES_STALE_TIME, move || {
            async move {
                let _ = old_response.await;
                Ok("old")
            }
            .boxed()
        });
        tokio::pin!(old);

        // Start the old fetch, then invalidate while it is still in flight.
        assert!(futures::poll!(old.as_mut()).is_pending());
        assert_eq!(
            cache.invalidate(keys.namespace(), &KeyFilter::EntryDetail("pi-hole-gateway".into())),
            1
        );

        let new = cache
            .fetch(key.clone(), ENTRIES_STALE_TIME, || async { Ok("new") }.boxed())
            .await;
        assert_eq!(new.unwrap(), "new");

        release_old.send(()).unwrap();
        assert_eq!(old.await.unwrap(), "old");

        assert_eq!(cache.get(&key), Some("new"));
        let cached = cache
            .fetch(key, ENTRIES_STALE_TIME, || async { Ok("unexpected") }.boxed())
            .await;
        assert_eq!(cached.unwrap(), "new");
    }

    #[tokio::test]
    async fn invalidated_data_is_refetched() {
        let cache = QueryCache::new();
        let keys = KeyScheme::default();
        let key = keys.entry_list(&ListParams::default());
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .fetch(key.clone(), ENTRIES_STALE_TIME, counting_fetcher(&calls, 1))
            .await
            .unwrap();
        assert_eq!(cache.invalidate(keys.namespace(), &KeyFilter::Tags), 0);
        assert_eq!(cache.invalidate(keys.namespace(), &KeyFilter::Entries), 1);

        // Stale data stays readable until it is replaced.
        assert_eq!(cache.get(&key), Some(1));

        let value = cache
            .fetch(key.clone(), ENTRIES_STALE_TIME, counting_fetcher(&calls, 2))
            .await;
        assert_eq!(value.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_is_resumed_by_next_caller() {
        let cache = QueryCache::new();
        let key = KeyScheme::default().tags();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let abandoned = cache.fetch(key.clone(), TAGS_STALE_TIME, counting_fetcher(&calls, 1));
            tokio::pin!(abandoned);
            assert!(futures::poll!(abandoned.as_mut()).is_pending());
        }
        assert!(cache.is_fetching(&key));

        let value = cache
            .fetch(key.clone(), TAGS_STALE_TIME, counting_fetcher(&calls, 2))
            .await;
        assert_eq!(value.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unused_entries_are_collected() {
        let cache = QueryCache::new();
        let keys = KeyScheme::default();
        for n in 0..100_u32 {
            let params = ListParams {
                search: Some(format!("term-{n}")),
                ..Default::default()
            };
            cache
                .fetch(keys.entry_list(&params), ENTRIES_STALE_TIME, move || {
                    async move { Ok(n) }.boxed()
                })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 100);

        tokio::time::advance(GC_TIME - Duration::from_secs(1)).await;
        assert_eq!(cache.gc(), 0);

        // Any fetch collects what has outlived the GC time.
        tokio::time::advance(Duration::from_secs(2)).await;
        let tags = keys.tags();
        cache
            .fetch(tags.clone(), TAGS_STALE_TIME, || async { Ok(7) }.boxed())
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&tags), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entries_outlive_a_shorter_gc_time() {
        let cache = QueryCache::with_gc_time(Duration::from_secs(1));
        let key = KeyScheme::default().tags();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .fetch(key.clone(), TAGS_STALE_TIME, counting_fetcher(&calls, 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.gc(), 0);

        tokio::time::advance(TAGS_STALE_TIME).await;
        assert_eq!(cache.gc(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_entries_are_not_collected() {
        let cache: QueryCache<u32> = QueryCache::new();
        let key = KeyScheme::default().tags();

        let (release, response) = oneshot::channel::<()>();
        let fetch = cache.fetch(key.clone(), TAGS_STALE_TIME, move || {
            async move {
                let _ = response.await;
                Ok(1)
            }
            .boxed()
        });
        tokio::pin!(fetch);
        assert!(futures::poll!(fetch.as_mut()).is_pending());

        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(cache.gc(), 0);
        assert!(cache.is_fetching(&key));

        release.send(()).unwrap();
        assert_eq!(fetch.await.unwrap(), 1);
        assert_eq!(cache.get(&key), Some(1));
    }

    #[tokio::test]
    async fn fetcher_may_use_the_cache() {
        let cache: QueryCache<bool> = QueryCache::new();
        let key = KeyScheme::default().tags();

        let inner = cache.clone();
        let inner_key = key.clone();
        let value = cache
            .fetch(key, TAGS_STALE_TIME, move || {
                let fetching = inner.is_fetching(&inner_key);
                async move { Ok(fetching) }.boxed()
            })
            .await;
        assert!(value.unwrap());
    }
}
