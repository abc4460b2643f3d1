use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe LRU cache for query embeddings, keyed by `(model, text)`
///
/// Repeated queries skip the embedding provider. Entries from different
/// models never collide.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<(String, String), Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let found = self
            .cache
            .lock()
            .unwrap()
            .get(&(model.to_string(), text.to_string()))
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, model: &str, text: &str, embedding: Vec<f32>) {
        self.cache
            .lock()
            .unwrap()
            .put((model.to_string(), text.to_string()), embedding);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_get() {
        let cache = EmbeddingCache::new(10);
        cache.put("m", "test query", vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get("m", "test query"), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(cache.get("m", "other"), None);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_models_do_not_collide() {
        let cache = EmbeddingCache::new(10);
        cache.put("small", "q", vec![1.0]);
        assert!(cache.get("large", "q").is_none());
    }

    #[test]
    fn test_cache_get_updates_lru() {
        let cache = EmbeddingCache::new(2);
        cache.put("m", "query1", vec![1.0]);
        cache.put("m", "query2", vec![2.0]);
        let _ = cache.get("m", "query1");
        cache.put("m", "query3", vec![3.0]);

        assert!(cache.get("m", "query1").is_some());
        assert!(cache.get("m", "query2").is_none());
        assert!(cache.get("m", "query3").is_some());
    }

    #[test]
    fn test_zero_capacity_and_clear() {
        let cache = EmbeddingCache::new(0);
        cache.put("m", "a", vec![1.0]);
        cache.put("m", "b", vec![2.0]);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
