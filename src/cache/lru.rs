use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::cache::{CacheAccess, CacheEntry, CacheKey};

/// Bundled in-memory cache region: a mutex-guarded LRU map. Suitable as a
/// default second-level cache when nothing distributed is wired in.
#[derive(Debug)]
pub struct LruCacheRegion {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl LruCacheRegion {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheAccess for LruCacheRegion {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(key, entry);
        }
    }

    fn evict(&self, key: &CacheKey) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.pop(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::generate_cache_key;
    use crate::core::Value;

    fn entry(tag: &str) -> CacheEntry {
        CacheEntry::Reference { subclass: tag.to_string(), state: vec![Value::Integer(1)] }
    }

    #[test]
    fn test_put_get_evict() {
        let region = LruCacheRegion::new(4);
        let key = generate_cache_key(&Value::Integer(1), "Account", None);
        region.put(key.clone(), entry("Account"));
        assert_eq!(region.get(&key).unwrap().subclass(), "Account");
        region.evict(&key);
        assert!(region.get(&key).is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let region = LruCacheRegion::new(1);
        let k1 = generate_cache_key(&Value::Integer(1), "Account", None);
        let k2 = generate_cache_key(&Value::Integer(2), "Account", None);
        region.put(k1.clone(), entry("a"));
        region.put(k2.clone(), entry("b"));
        assert!(region.get(&k1).is_none());
        assert!(region.get(&k2).is_some());
    }

    #[test]
    fn test_tenant_isolated_keys() {
        let region = LruCacheRegion::new(4);
        let k1 = generate_cache_key(&Value::Integer(1), "Account", Some("acme"));
        let k2 = generate_cache_key(&Value::Integer(1), "Account", Some("globex"));
        region.put(k1.clone(), entry("a"));
        assert!(region.get(&k2).is_none());
        assert!(region.get(&k1).is_some());
    }
}
