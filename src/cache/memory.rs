use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cache::{CacheLookup, CacheStore};

/// Cached value plus the TTL requested at insert time; the moka `Expiry`
/// policy reads the TTL back out.
#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// 进程内缓存后端（moka），用于单进程部署和测试
pub struct MemoryCacheStore {
    inner: Cache<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        debug!(
            "MemoryCacheStore initialized with max capacity: {}",
            max_capacity
        );
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheLookup {
        match self.inner.get(key).await {
            Some(entry) => CacheLookup::Hit(entry.value),
            None => CacheLookup::Miss,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
    }

    async fn remove(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryCacheStore::new(100);
        assert_eq!(store.get("k").await, CacheLookup::Miss);

        store.set("k", "v", Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await, CacheLookup::Hit("v".to_string()));

        store.remove("k").await;
        assert_eq!(store.get("k").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryCacheStore::new(100);
        store.set("k", "v", Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await, CacheLookup::Hit("v".to_string()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.get("k").await, CacheLookup::Miss);
    }
}
