//! Bounded LRU cache of query embeddings.
//!
//! Repeated questions ("what is the termination clause?") are common in a
//! chat session, and embedding a query is the slowest step of retrieval.
//! Keys are the trimmed, lower-cased query text.
//!
//! The whole lookup-compute-insert sequence runs under one async mutex, so
//! concurrent identical queries compute their embedding once.

use std::future::Future;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

/// Default number of cached query embeddings.
pub const QUERY_CACHE_CAPACITY: usize = 32;

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

struct Inner {
    entries: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

pub struct QueryEmbeddingCache {
    inner: Mutex<Inner>,
}

/// Cache key for a query.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

impl QueryEmbeddingCache {
    pub fn new() -> Self {
        Self::with_capacity(QUERY_CACHE_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Return the cached embedding for `query`, or run `compute` and cache it.
    ///
    /// A hit promotes the entry to most-recently-used. A miss inserts the
    /// result, evicting the least-recently-used entry when full. Errors from
    /// `compute` are returned and nothing is cached.
    pub async fn get_or_compute<F, Fut, E>(&self, query: &str, compute: F) -> Result<Vec<f32>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>>,
    {
        let key = normalize_query(query);
        let mut inner = self.inner.lock().await;

        if let Some(vector) = inner.entries.get(&key).cloned() {
            inner.hits += 1;
            tracing::debug!(query = %key, "query embedding cache hit");
            return Ok(vector);
        }

        inner.misses += 1;
        let vector = compute().await?;
        inner.entries.put(key, vector.clone());
        Ok(vector)
    }

    /// Whether `query` is cached. Does not change recency.
    pub async fn contains(&self, query: &str) -> bool {
        self.inner.lock().await.entries.contains(&normalize_query(query))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop all entries. Counters are kept.
    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }
}

impl Default for QueryEmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn fill(cache: &QueryEmbeddingCache, query: &str, value: f32) -> Vec<f32> {
        cache
            .get_or_compute(query, || async move { Ok::<_, String>(vec![value]) })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn normalized_queries_share_an_entry() {
        let cache = QueryEmbeddingCache::new();
        fill(&cache, "  What is the Term? ", 1.0).await;
        let v = fill(&cache, "what is the term?", 2.0).await;
        assert_eq!(v, vec![1.0]);
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn evicts_least_recently_used_past_capacity() {
        let cache = QueryEmbeddingCache::new();
        for i in 0..QUERY_CACHE_CAPACITY {
            fill(&cache, &format!("q{}", i), i as f32).await;
        }
        // Touch q0 so q1 becomes the oldest.
        fill(&cache, "q0", -1.0).await;
        fill(&cache, "q-new", 99.0).await;

        assert_eq!(cache.len().await, QUERY_CACHE_CAPACITY);
        assert!(cache.contains("q0").await);
        assert!(!cache.contains("q1").await);
        assert!(cache.contains("q-new").await);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = QueryEmbeddingCache::new();
        let err = cache
            .get_or_compute("q", || async { Err::<Vec<f32>, _>("backend down") })
            .await
            .unwrap_err();
        assert_eq!(err, "backend down");
        assert!(cache.is_empty().await);

        assert_eq!(fill(&cache, "q", 3.0).await, vec![3.0]);
    }

    #[tokio::test]
    async fn concurrent_identical_queries_compute_once() {
        let cache = QueryEmbeddingCache::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(vec![0.5])
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute("same question", compute),
            cache.get_or_compute("Same Question", compute),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_empties_but_keeps_counters() {
        let cache = QueryEmbeddingCache::with_capacity(0);
        fill(&cache, "a", 1.0).await;
        fill(&cache, "b", 2.0).await;
        assert_eq!(cache.len().await, 1);
        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.capacity, 1);
    }
}
