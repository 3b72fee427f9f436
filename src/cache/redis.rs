use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, error, trace};

use crate::cache::{CacheLookup, CacheStore};
use crate::errors::{AppError, Result};

/// Redis 缓存后端
pub struct RedisCacheStore {
    /// ConnectionManager 自动处理重连
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCacheStore {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        debug!("Initializing RedisCacheStore with prefix: '{}'", key_prefix);

        let client = redis::Client::open(url)
            .map_err(|e| AppError::upstream_unavailable(format!("Failed to create Redis client: {e}")))?;

        // 使用 ConnectionManager，支持自动重连
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            AppError::upstream_unavailable(format!("Failed to create Redis ConnectionManager: {e}"))
        })?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheLookup {
        let redis_key = self.make_key(key);

        // ConnectionManager 可以直接 clone 使用
        let mut conn = self.connection.clone();

        let result: redis::RedisResult<Option<String>> = conn.get(&redis_key).await;
        match result {
            Ok(Some(value)) => {
                trace!("Cache hit: {}", key);
                CacheLookup::Hit(value)
            }
            Ok(None) => {
                trace!("Cache miss: {}", key);
                CacheLookup::Miss
            }
            Err(e) => {
                // 读失败按未命中处理，走数据库兜底
                error!("Redis get error (will auto-reconnect): {}", e);
                CacheLookup::Miss
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let redis_key = self.make_key(key);
        let mut conn = self.connection.clone();
        let ttl_secs = ttl.as_secs().max(1);

        match conn
            .set_ex::<String, &str, ()>(redis_key, value, ttl_secs)
            .await
        {
            Ok(_) => {
                trace!("Cached key: {} (TTL: {}s)", key, ttl_secs);
            }
            Err(e) => {
                error!("Failed to cache key '{}': {}", key, e);
            }
        }
    }

    async fn remove(&self, key: &str) {
        let redis_key = self.make_key(key);
        let mut conn = self.connection.clone();

        match conn.del::<String, i32>(redis_key).await {
            Ok(deleted) => {
                if deleted > 0 {
                    trace!("Removed key from cache: {}", key);
                }
            }
            Err(e) => {
                error!("Failed to remove key '{}': {}", key, e);
            }
        }
    }
}
