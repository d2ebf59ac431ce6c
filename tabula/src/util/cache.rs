use std::{
    collections::hash_map::RandomState,
    future::Future,
    hash::{BuildHasher, Hash},
};

use moka::future::{Cache as MokaCache, ConcurrentCacheExt};

/// An async loading cache.
///
/// Concurrent loads of the same key are coalesced: only one of the init
/// futures runs, the other callers wait for its outcome.
pub struct Cache<K, V, S = RandomState> {
    inner: MokaCache<K, V, S>,
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Constructs a new cache.
    pub fn new(capacity: u64, hasher: S) -> Cache<K, V, S> {
        let inner = MokaCache::builder()
            .max_capacity(capacity)
            .build_with_hasher(hasher);

        Cache { inner }
    }

    /// Tries to load the element using the given key. If such an element
    /// doesn't exist, executes the future to populate the cache entry.
    /// Failed loads are not cached.
    pub async fn load<F, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: Future<Output = Result<V, E>>,
        E: Clone + Send + Sync + 'static,
    {
        self.inner
            .try_get_with(key, init)
            .await
            .map_err(|err| (*err).clone())
    }

    /// Returns the cached element, without loading it.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    /// Caches an element, replacing any previous one. Unlike [`Cache::load`],
    /// concurrent inserts are not coalesced.
    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    /// Number of cached elements, once pending evictions are applied.
    pub fn len(&self) -> u64 {
        self.inner.sync();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts the element for the given key.
    pub async fn evict(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Evicts every element.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_not_execute_loader_twice() {
        let c = build_cache(4);

        let v1 = c.load(1, async { Ok::<_, ()>("one".to_owned()) }).await.unwrap();
        assert_eq!(v1, "one");

        let v1 = c
            .load::<_, ()>(1, async {
                panic!("shouldn't exec loader again");
            })
            .await
            .unwrap();
        assert_eq!(v1, "one");
    }

    #[tokio::test]
    async fn should_execute_loader_when_evicted() {
        let c = build_cache(4);

        c.load(1, async { Ok::<_, ()>("one".to_owned()) }).await.unwrap();
        c.evict(&1).await;

        let v1 = c.load(1, async { Ok::<_, ()>("two".to_owned()) }).await.unwrap();
        assert_eq!(v1, "two");
    }

    #[tokio::test]
    async fn should_not_cache_failures() {
        let c = build_cache(4);

        let err = c.load(1, async { Err::<String, _>("boom") }).await;
        assert_eq!(err, Err("boom"));

        let v1 = c.load(1, async { Ok::<_, &str>("one".to_owned()) }).await;
        assert_eq!(v1.as_deref(), Ok("one"));
    }

    #[tokio::test]
    async fn should_stay_within_capacity() {
        let c = build_cache(4);
        c.insert(100, "hundred".to_owned()).await;
        assert_eq!(c.get(&100).as_deref(), Some("hundred"));

        for i in 0..64 {
            c.insert(i, i.to_string()).await;
        }
        assert!(c.len() <= 4);

        c.clear();
        assert!(c.get(&100).is_none());
    }

    fn build_cache(cap: u64) -> Cache<u32, String> {
        Cache::new(cap, RandomState::default())
    }
}
