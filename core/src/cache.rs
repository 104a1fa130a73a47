//! Result cache: bounded capacity, fixed TTL, least-recently-used eviction.
//! Keys are normalized query text only; entries die at TTL expiry, so no
//! query outlives the cache window.

use crate::config::CacheConfig;
use crate::pipeline::QueryResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    results: Vec<QueryResult>,
    stored_at: Instant,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

pub struct ResultCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity: cfg.capacity,
            ttl: cfg.ttl,
        }
    }

    /// Look up a normalized query. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<Vec<QueryResult>> {
        let mut inner = self.inner.lock();
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|e| e.stored_at.elapsed() >= self.ttl);
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(entry.results.clone())
    }

    pub fn insert(&self, key: String, results: Vec<QueryResult>) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let ttl = self.ttl;
        inner.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(&key) {
            if let Some(lru) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru);
            }
        }
        inner.entries.insert(
            key,
            CacheEntry {
                results,
                stored_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(capacity: usize, ttl: Duration) -> CacheConfig {
        CacheConfig { capacity, ttl }
    }

    fn result(doc_id: u64) -> QueryResult {
        QueryResult {
            rank: 1,
            doc_id,
            score: 50.0,
            url: "https://example.se/".to_string(),
            title: "Example".to_string(),
            snippet: String::new(),
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = ResultCache::new(&cfg(4, Duration::from_secs(60)));
        cache.insert("universitet".to_string(), vec![result(1)]);
        let hit = cache.get("universitet").unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].doc_id, 1);
        assert!(cache.get("uppsala").is_none());
    }

    #[test]
    fn expired_entries_are_dropped_on_access() {
        let cache = ResultCache::new(&cfg(4, Duration::from_millis(10)));
        cache.insert("q".to_string(), vec![result(1)]);
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("q").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache = ResultCache::new(&cfg(2, Duration::from_secs(60)));
        cache.insert("a".to_string(), vec![result(1)]);
        cache.insert("b".to_string(), vec![result(2)]);
        // Touch "a" so "b" becomes least recently used.
        cache.get("a");
        cache.insert("c".to_string(), vec![result(3)]);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_updates_existing_key() {
        let cache = ResultCache::new(&cfg(2, Duration::from_secs(60)));
        cache.insert("a".to_string(), vec![result(1)]);
        cache.insert("a".to_string(), vec![result(2)]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap()[0].doc_id, 2);
    }
}
