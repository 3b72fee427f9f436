use async_trait::async_trait;
use std::time::Duration;

/// 缓存查询结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// 未命中（包括后端出错降级的情况）
    Miss,
    /// 命中
    Hit(String),
}

/// Raw string cache backend.
///
/// Implementations never surface backend errors: a failed read degrades to
/// `Miss`, a failed write is logged and dropped. Callers that need the
/// database fallback behavior get it for free.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheLookup;
    async fn set(&self, key: &str, value: &str, ttl: Duration);
    async fn remove(&self, key: &str);
}
