//! Bounded LRU cache over vocabulary responses
//!
//! Keys are `(operation, normalized parameters)` strings, values are the
//! serialized response. Only successful responses are inserted; a failed
//! lookup is never cached, so there is no stale negative caching. The lock
//! is held only for the map operation itself, which keeps each entry
//! linearizable without blocking I/O.

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub struct VocabularyCache {
    entries: Mutex<LruCache<String, serde_json::Value>>,
}

impl VocabularyCache {
    /// A zero capacity would make LruCache panic; treat it as one entry.
    /// Config validation rejects zero earlier anyway.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn put<T: Serialize>(&self, key: String, value: &T) {
        if let Ok(value) = serde_json::to_value(value) {
            let mut entries = self.entries.lock().expect("cache lock poisoned");
            entries.put(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn put_get_roundtrip() {
        let cache = VocabularyCache::new(10);
        cache.put("concept/1".to_string(), &vec![1, 2, 3]);

        let hit: Option<Vec<i32>> = cache.get("concept/1");
        assert_eq!(hit, Some(vec![1, 2, 3]));

        let miss: Option<Vec<i32>> = cache.get("concept/2");
        assert_eq!(miss, None);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = VocabularyCache::new(2);
        cache.put("a".to_string(), &1);
        cache.put("b".to_string(), &2);

        // Touch "a" so "b" becomes the eviction candidate
        let _: Option<i32> = cache.get("a");
        cache.put("c".to_string(), &3);

        assert_eq!(cache.get::<i32>("a"), Some(1));
        assert_eq!(cache.get::<i32>("b"), None);
        assert_eq!(cache.get::<i32>("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_degrades_to_one() {
        let cache = VocabularyCache::new(0);
        cache.put("a".to_string(), &1);
        assert_eq!(cache.get::<i32>("a"), Some(1));
    }
}
