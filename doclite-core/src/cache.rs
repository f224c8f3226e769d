// src/cache.rs
// TTL-based query result cache, keyed by the serialized base query and
// invalidated wholesale on any mutation of the owning collection.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

/// Default lifetime of a cached result set.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    docs: Vec<Value>,
    expires_at: Instant,
}

/// Per-collection query cache. Coarse by design: any write clears the whole
/// cache, which keeps stale entries impossible without per-key bookkeeping.
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        QueryCache {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a cached result set; expired entries are removed on read.
    pub fn get(&self, key: &str) -> Option<Vec<Value>> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if Instant::now() < entry.expires_at {
                    return Some(entry.docs.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: String, docs: Vec<Value>) {
        self.entries.insert(
            key,
            CacheEntry {
                docs,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every cached entry. Called after any mutation.
    pub fn invalidate_all(&self) {
        trace!(entries = self.entries.len(), "invalidating query cache");
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_get() {
        let cache = QueryCache::new();
        cache.put("{\"a\":1}".into(), vec![json!({"a": 1})]);

        let hit = cache.get("{\"a\":1}").unwrap();
        assert_eq!(hit.len(), 1);
        assert!(cache.get("{\"b\":2}").is_none());
    }

    #[test]
    fn test_expiry() {
        let cache = QueryCache::with_ttl(Duration::from_millis(10));
        cache.put("k".into(), vec![json!({})]);

        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = QueryCache::new();
        cache.put("a".into(), vec![]);
        cache.put("b".into(), vec![]);
        assert_eq!(cache.len(), 2);

        cache.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
