pub mod entry;
pub mod lru;

use crate::core::Value;

pub use entry::{
    AssembledEntry, CacheEntry, CacheEntryStrategy, ReferenceCacheEntryStrategy,
    StandardCacheEntryStrategy, StructuredCacheEntryStrategy, select_strategy,
};
pub use lru::LruCacheRegion;

/// Second-level cache key: navigable role + identifier + tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub role: String,
    pub id: Value,
    pub tenant: Option<String>,
}

pub fn generate_cache_key(id: &Value, role: &str, tenant: Option<&str>) -> CacheKey {
    CacheKey {
        role: role.to_string(),
        id: id.clone(),
        tenant: tenant.map(str::to_string),
    }
}

/// A second-level cache region. Implementations are shared across units of
/// work and must tolerate concurrent access.
pub trait CacheAccess: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    fn put(&self, key: CacheKey, entry: CacheEntry);
    fn evict(&self, key: &CacheKey);
}
