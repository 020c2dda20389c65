use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Bounded associative cache with optional TTL.
//
// Eviction is by entry age (insertion time), not recency of access: the
// query caches this backs are shadowed by the index-revision check anyway,
// so precise LRU ordering buys nothing over the simpler age scan at these
// sizes (≤128 entries).
// ---------------------------------------------------------------------------

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

pub struct LruCache<K, V> {
    map: HashMap<K, CacheEntry<V>>,
    max_entries: usize,
    ttl: Option<Duration>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// `ttl_ms == 0` disables expiry.
    pub fn new(max_entries: usize, ttl_ms: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_entries: max_entries.max(1),
            ttl: (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms)),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(ttl) = self.ttl {
            if self
                .map
                .get(key)
                .is_some_and(|e| e.created_at.elapsed() > ttl)
            {
                self.map.remove(key);
                return None;
            }
        }
        self.map.get(key).map(|e| &e.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
        while self.map.len() > self.max_entries {
            let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.map.remove(&oldest);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_is_enforced() {
        let mut cache: LruCache<u32, u32> = LruCache::new(3, 0);
        for i in 0..10 {
            cache.insert(i, i * 10);
            assert!(cache.len() <= 3);
        }
        // The newest entry always survives its own insert.
        assert_eq!(cache.get(&9), Some(&90));
    }

    #[test]
    fn oldest_entry_is_evicted_first() {
        let mut cache: LruCache<&str, u32> = LruCache::new(2, 0);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert!(!cache.contains(&"a"));
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn ttl_expires_entries() {
        let mut cache: LruCache<&str, u32> = LruCache::new(4, 10);
        cache.insert("k", 7);
        assert_eq!(cache.get(&"k"), Some(&7));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinsert_refreshes_age() {
        let mut cache: LruCache<&str, u32> = LruCache::new(2, 0);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 3);
        cache.insert("c", 4);
        // "b" is now the oldest and gets evicted, not the refreshed "a".
        assert!(!cache.contains(&"b"));
        assert_eq!(cache.get(&"a"), Some(&3));
    }

    #[test]
    fn remove_and_clear() {
        let mut cache: LruCache<&str, u32> = LruCache::new(4, 0);
        cache.insert("a", 1);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);
        cache.insert("b", 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
