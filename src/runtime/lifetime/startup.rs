//! Shared composition pieces
//!
//! Every mode wires its own dependency graph explicitly; these helpers
//! build the parts more than one mode needs. No process-wide singletons:
//! everything is constructed here and handed down.

use std::sync::Arc;
use tracing::warn;

use crate::cache::{CacheAside, CacheStore, MemoryCacheStore, RedisCacheStore};
use crate::config::AppConfig;
use crate::errors::Result;
use crate::repository::{self, SeaOrmLinkRepository};

/// Open the database pool and wrap it in the link repository.
pub async fn build_repository(config: &AppConfig) -> Result<Arc<SeaOrmLinkRepository>> {
    let db = repository::connect(&config.database).await?;
    Ok(Arc::new(SeaOrmLinkRepository::new(db)))
}

/// Build the shared cache tier. Prefers Redis; an unreachable Redis at
/// startup degrades to the in-process store so the service still boots
/// (reads then fall through to the database, same as any cache error).
pub async fn build_cache(config: &AppConfig) -> Arc<CacheAside> {
    let store: Arc<dyn CacheStore> = match RedisCacheStore::connect(
        &config.cache.redis.url,
        &config.cache.redis.key_prefix,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                error = %e,
                "Redis unavailable at startup, falling back to in-process cache"
            );
            Arc::new(MemoryCacheStore::new(config.cache.memory.max_capacity))
        }
    };

    Arc::new(CacheAside::new(store))
}

/// Raw Redis connection for the rate limiter; `None` switches it to the
/// in-process fallback map.
pub async fn build_rate_limit_redis(
    config: &AppConfig,
) -> Option<redis::aio::ConnectionManager> {
    let client = match redis::Client::open(config.cache.redis.url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Invalid Redis URL for rate limiter, using in-memory fallback");
            return None;
        }
    };

    match redis::aio::ConnectionManager::new(client).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!(error = %e, "Redis unavailable for rate limiter, using in-memory fallback");
            None
        }
    }
}
