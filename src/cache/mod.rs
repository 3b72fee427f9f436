//! Cache tier
//!
//! One abstraction, two operations: `get_or_fill` (cache-aside with per-key
//! single-flight) and `set` (best-effort write-through). Backends implement
//! the raw [`CacheStore`] trait; [`CacheAside`] layers the lease logic on
//! top.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::errors::Result;

mod memory;
mod null;
mod redis;
mod traits;

pub use memory::MemoryCacheStore;
pub use null::NullCacheStore;
pub use redis::RedisCacheStore;
pub use traits::{CacheLookup, CacheStore};

/// Value produced by a cache filler: the value to cache plus an optional
/// TTL override (some fillers only learn the right TTL from the data they
/// fetched, like link expiry or upstream cache-duration).
pub type FillResult = Result<(String, Option<Duration>)>;

/// Cache-aside wrapper with single-flight misses.
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    /// Per-key lease table; the lease holder is the only task allowed to run
    /// the filler for that key.
    leases: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            leases: DashMap::new(),
        }
    }

    /// Look the key up; on a miss acquire the per-key lease, re-check, run
    /// the filler at most once, write the result through and return it.
    ///
    /// Guarantee: at most one filler execution per key per miss window, no
    /// matter how many tasks race on the same key. Filler errors propagate
    /// and cache nothing.
    pub async fn get_or_fill<F, Fut>(
        &self,
        key: &str,
        default_ttl: Duration,
        filler: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FillResult>,
    {
        if let CacheLookup::Hit(value) = self.store.get(key).await {
            return Ok(value);
        }

        let lease = self
            .leases
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lease.lock().await;

        // 拿到租约后再查一次：可能别的任务已经填好了
        if let CacheLookup::Hit(value) = self.store.get(key).await {
            self.leases.remove(key);
            drop(guard);
            return Ok(value);
        }

        trace!("cache fill: {}", key);
        let outcome = filler().await;

        let result = match outcome {
            Ok((value, ttl_override)) => {
                let ttl = ttl_override.unwrap_or(default_ttl);
                self.store.set(key, &value, ttl).await;
                Ok(value)
            }
            Err(e) => Err(e),
        };

        // 先从租约表移除再释放锁：后续等待者拿到锁后会命中缓存，
        // 新到达者创建新租约同样先查缓存
        self.leases.remove(key);
        drop(guard);

        result
    }

    /// Best-effort write-through.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.store.set(key, value, ttl).await;
    }

    pub async fn get(&self, key: &str) -> CacheLookup {
        self.store.get(key).await
    }

    pub async fn remove(&self, key: &str) {
        self.store.remove(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fill_once_then_hit() {
        let aside = CacheAside::new(Arc::new(MemoryCacheStore::new(100)));
        let calls = AtomicUsize::new(0);

        let v1 = aside
            .get_or_fill("k", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(("value".to_string(), None))
            })
            .await
            .unwrap();
        assert_eq!(v1, "value");

        let v2 = aside
            .get_or_fill("k", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(("other".to_string(), None))
            })
            .await
            .unwrap();
        assert_eq!(v2, "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_under_contention() {
        let aside = Arc::new(CacheAside::new(Arc::new(MemoryCacheStore::new(100))));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..32 {
            let aside = Arc::clone(&aside);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                aside
                    .get_or_fill("hot", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // 放大填充窗口，逼出并发填充的竞态
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(("dest".to_string(), None))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "dest");
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "filler must run at most once per miss"
        );
    }

    #[tokio::test]
    async fn test_filler_error_caches_nothing() {
        let aside = CacheAside::new(Arc::new(MemoryCacheStore::new(100)));

        let err = aside
            .get_or_fill("k", Duration::from_secs(60), || async {
                Err(crate::errors::AppError::not_found("missing"))
            })
            .await;
        assert!(err.is_err());

        // 出错不写缓存，下一次仍会执行 filler
        let ok = aside
            .get_or_fill("k", Duration::from_secs(60), || async {
                Ok(("found".to_string(), None))
            })
            .await
            .unwrap();
        assert_eq!(ok, "found");
    }

    #[tokio::test]
    async fn test_ttl_override_applies() {
        let aside = CacheAside::new(Arc::new(MemoryCacheStore::new(100)));

        aside
            .get_or_fill("k", Duration::from_secs(3600), || async {
                Ok(("v".to_string(), Some(Duration::from_millis(50))))
            })
            .await
            .unwrap();

        assert_eq!(aside.get("k").await, CacheLookup::Hit("v".to_string()));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(aside.get("k").await, CacheLookup::Miss);
    }
}
