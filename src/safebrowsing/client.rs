use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use prost::Message;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::CacheAside;
use crate::config::SafeBrowsingConfig;
use crate::errors::{AppError, Result};
use crate::safebrowsing::canonicalize::{canonicalize, suffix_for_hashing};
use crate::safebrowsing::proto::SearchHashesResponse;

/// 未携带 cache_duration 时的响应缓存时长
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Flagged,
}

/// Safe Browsing 查询客户端
///
/// 规范化 → SHA-256 → 4 字节前缀查询，响应按服务端给出的
/// cache_duration 缓存在前缀键下。网络或解码失败向上抛
/// UPSTREAM_UNAVAILABLE，由创建链接的调用方决定 fail-closed。
pub struct SafeBrowsing {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    cache: Arc<CacheAside>,
}

impl SafeBrowsing {
    pub fn new(config: &SafeBrowsingConfig, cache: Arc<CacheAside>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            cache,
        })
    }

    /// 判定一个 URL 是否被标记为恶意
    pub async fn check(&self, raw_url: &str) -> Result<Verdict> {
        let canonical = canonicalize(raw_url)?;
        let full_hash = hash_canonical(&canonical);
        let prefix_key = prefix_key(&full_hash);

        debug!(canonical = %canonical, prefix = %prefix_key, "safe browsing lookup");

        let cache_key = format!("sb:{}", prefix_key);
        let encoded = self
            .cache
            .get_or_fill(&cache_key, DEFAULT_CACHE_TTL, || {
                self.fetch_prefix(prefix_key.clone())
            })
            .await?;

        let bytes = STANDARD
            .decode(&encoded)
            .map_err(|e| AppError::internal(format!("corrupt cached response: {e}")))?;
        let response = SearchHashesResponse::decode(bytes.as_slice())
            .map_err(|e| AppError::internal(format!("corrupt cached response: {e}")))?;

        Ok(verdict_for(&response, &full_hash))
    }

    /// 拉取一个前缀的完整哈希列表；返回值进缓存（base64 编码的原始
    /// protobuf 字节），TTL 取服务端的 cache_duration
    async fn fetch_prefix(&self, prefix_key: String) -> crate::cache::FillResult {
        let url = format!(
            "{}/v5/hashes:search?key={}&hashPrefixes={}",
            self.endpoint, self.api_key, prefix_key
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/x-protobuf")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("safe browsing API returned {}", status);
            return Err(AppError::upstream_unavailable(format!(
                "safe browsing API error: {}",
                status
            )));
        }

        let bytes = response.bytes().await?;
        let decoded = SearchHashesResponse::decode(bytes.as_ref()).map_err(|e| {
            AppError::upstream_unavailable(format!("failed to parse protobuf response: {e}"))
        })?;

        let ttl = decoded
            .cache_duration
            .as_ref()
            .map(|d| Duration::from_secs(d.seconds.max(0) as u64));
        if let Some(ref ttl) = ttl {
            debug!("safe browsing cache duration: {:?}", ttl);
        }

        Ok((STANDARD.encode(&bytes), ttl))
    }
}

/// SHA-256 over host + path + optional `?query` of the canonical form.
pub(crate) fn hash_canonical(canonical: &str) -> [u8; 32] {
    let suffix = suffix_for_hashing(canonical);
    Sha256::digest(suffix.as_bytes()).into()
}

/// base64url of the first 4 hash bytes; doubles as the cache key component.
pub(crate) fn prefix_key(full_hash: &[u8; 32]) -> String {
    URL_SAFE.encode(&full_hash[..4])
}

/// 仅当某个返回的完整哈希逐字节相等时才判定为 Flagged
fn verdict_for(response: &SearchHashesResponse, full_hash: &[u8; 32]) -> Verdict {
    for matched in &response.full_hashes {
        if matched.full_hash.as_slice() == full_hash {
            return Verdict::Flagged;
        }
    }
    Verdict::Safe
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safebrowsing::proto::FullHash;

    #[test]
    fn test_hash_is_over_suffix_not_scheme() {
        // http 与 https 的同一 host/path 必须哈希一致
        let h1 = hash_canonical("http://example.com/a?x=1");
        let h2 = hash_canonical("https://example.com/a?x=1");
        assert_eq!(h1, h2);

        let h3 = hash_canonical("https://example.com/b?x=1");
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_prefix_key_is_base64url_of_4_bytes() {
        let mut hash = [0u8; 32];
        hash[..4].copy_from_slice(&[0xFB, 0xEF, 0xBE, 0xFF]);
        let key = prefix_key(&hash);
        // 4 字节 → 8 个 base64 字符（含填充），URL-safe 字母表
        assert_eq!(key.len(), 8);
        assert!(!key.contains('+') && !key.contains('/'));
    }

    #[test]
    fn test_verdict_requires_exact_full_hash_match() {
        let local = hash_canonical("http://evil.test/");

        let mut near_miss = local;
        near_miss[31] ^= 0x01;

        let response = SearchHashesResponse {
            full_hashes: vec![FullHash {
                full_hash: near_miss.to_vec(),
            }],
            cache_duration: None,
        };
        assert_eq!(verdict_for(&response, &local), Verdict::Safe);

        let response = SearchHashesResponse {
            full_hashes: vec![FullHash {
                full_hash: local.to_vec(),
            }],
            cache_duration: None,
        };
        assert_eq!(verdict_for(&response, &local), Verdict::Flagged);
    }

    #[test]
    fn test_empty_response_is_safe() {
        let local = hash_canonical("http://example.com/");
        let response = SearchHashesResponse {
            full_hashes: vec![],
            cache_duration: None,
        };
        assert_eq!(verdict_for(&response, &local), Verdict::Safe);
    }
}
