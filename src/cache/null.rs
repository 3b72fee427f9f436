use async_trait::async_trait;
use std::time::Duration;

use crate::cache::{CacheLookup, CacheStore};

/// No-op backend: every read misses, every write vanishes.
/// Exercises the database-fallback path in tests.
pub struct NullCacheStore;

#[async_trait]
impl CacheStore for NullCacheStore {
    async fn get(&self, _key: &str) -> CacheLookup {
        CacheLookup::Miss
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) {}

    async fn remove(&self, _key: &str) {}
}
