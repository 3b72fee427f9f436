//! Redirect resolution
//!
//! Cache-aside with single-flight: concurrent misses on the same code cost
//! at most one database read. Negative results are cached briefly under a
//! sentinel so a hammered dead code does not hammer the database. A cache
//! entry that fails to decode is treated as a miss: the bad entry is
//! dropped and the database answers.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheAside, CacheLookup, FillResult};
use crate::errors::{AppError, Result};
use crate::repository::LinkRepository;

/// 解析路径缓存 TTL 上限（一年）
const RESOLVE_TTL_CAP: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// 负缓存标记的 TTL
const NEGATIVE_TTL: Duration = Duration::from_secs(30);
/// 负缓存标记：目的地址必为合法 URL，不可能与其冲突
const NEGATIVE_SENTINEL: &str = "!notfound";

/// 本次解析命中的层级，随点击事件上报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Cache,
    Db,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Cache => "cache",
            CacheTier::Db => "db",
        }
    }
}

/// 解析结果
#[derive(Debug, Clone)]
pub struct Resolved {
    pub url_id: i64,
    pub destination_url: String,
    pub cache_tier: CacheTier,
}

pub fn redirect_cache_key(short_code: &str) -> String {
    format!("redirect:{}", short_code)
}

/// 缓存值格式：`<url_id>|<destination>`，url_id 供点击事件使用。
/// 创建路径的写穿和解析路径的回填都必须走这里，保持同一种线格式。
pub(crate) fn encode_cached(url_id: i64, destination: &str) -> String {
    format!("{}|{}", url_id, destination)
}

pub struct RedirectService {
    repo: Arc<dyn LinkRepository>,
    cache: Arc<CacheAside>,
}

impl RedirectService {
    pub fn new(repo: Arc<dyn LinkRepository>, cache: Arc<CacheAside>) -> Self {
        Self { repo, cache }
    }

    /// Resolve a short code to its destination.
    ///
    /// Missing, expired and non-active links all surface as `NOT_FOUND`.
    /// Cache errors degrade to database reads; database errors surface as
    /// `UPSTREAM_UNAVAILABLE`.
    pub async fn resolve(&self, short_code: &str) -> Result<Resolved> {
        let key = redirect_cache_key(short_code);

        // 先手动查一次，既为了命中层级统计，也让 sentinel 命中不进入
        // single-flight 通道
        if let CacheLookup::Hit(value) = self.cache.get(&key).await {
            match decode_cached(&value, CacheTier::Cache) {
                Ok(resolved) => return Ok(resolved),
                Err(err @ AppError::NotFound(_)) => return Err(err),
                Err(_) => {
                    // 内容损坏按未命中处理：清掉坏条目，走数据库
                    warn!(short_code = %short_code, "Dropping corrupt cache entry");
                    self.cache.remove(&key).await;
                }
            }
        }

        let value = self
            .cache
            .get_or_fill(&key, RESOLVE_TTL_CAP, || {
                let code = short_code.to_string();
                async move { self.load_from_db(&code).await }
            })
            .await?;

        match decode_cached(&value, CacheTier::Db) {
            Ok(resolved) => Ok(resolved),
            Err(err @ AppError::NotFound(_)) => Err(err),
            Err(_) => {
                // 租约再查可能返回别处写入的坏条目；同样降级回源并修复
                warn!(short_code = %short_code, "Dropping corrupt cache entry after fill");
                self.cache.remove(&key).await;

                let (value, ttl) = self.load_from_db(short_code).await?;
                self.cache
                    .set(&key, &value, ttl.unwrap_or(RESOLVE_TTL_CAP))
                    .await;
                decode_cached(&value, CacheTier::Db)
            }
        }
    }

    /// 数据库回源：命中可解析链接返回编码值与按剩余有效期封顶的 TTL，
    /// 其余情况返回短 TTL 的负标记
    async fn load_from_db(&self, short_code: &str) -> FillResult {
        debug!(short_code = %short_code, "Cache miss, querying database");

        let link = self.repo.find_by_code(short_code).await?;
        let now = Utc::now();

        match link {
            Some(link) if link.is_resolvable(now) => {
                let ttl = match link.expires_at {
                    Some(expiry) => {
                        let remaining = (expiry - now).num_seconds().max(1) as u64;
                        Duration::from_secs(remaining).min(RESOLVE_TTL_CAP)
                    }
                    None => RESOLVE_TTL_CAP,
                };
                Ok((encode_cached(link.id, &link.destination_url), Some(ttl)))
            }
            // 不存在 / 已过期 / 非 active：缓存短暂的负标记
            _ => Ok((NEGATIVE_SENTINEL.to_string(), Some(NEGATIVE_TTL))),
        }
    }
}

fn decode_cached(value: &str, tier: CacheTier) -> Result<Resolved> {
    if value == NEGATIVE_SENTINEL {
        return Err(AppError::not_found("short code not found"));
    }

    match value.split_once('|') {
        Some((id, destination)) => {
            let url_id = id
                .parse()
                .map_err(|_| AppError::internal("corrupt cache entry"))?;
            Ok(Resolved {
                url_id,
                destination_url: destination.to_string(),
                cache_tier: tier,
            })
        }
        None => Err(AppError::internal("corrupt cache entry")),
    }
}
