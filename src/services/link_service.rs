//! Link management: creation, listing, status transitions, expiry sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheAside;
use crate::codec;
use crate::errors::{AppError, Result};
use crate::minter::Minter;
use crate::repository::{Link, LinkRepository, LinkStatus, NewLink};
use crate::safebrowsing::{SafetyOracle, Verdict};
use crate::services::redirect::{encode_cached, redirect_cache_key};
use crate::system::signal::ShutdownSignal;

/// 写穿缓存的 TTL 上限
const WRITE_THROUGH_TTL_CAP: Duration = Duration::from_secs(24 * 60 * 60);
/// expires_at 最少要在未来多久（秒）
const MIN_EXPIRY_LEAD_SECS: i64 = 60;

const MAX_URL_LEN: usize = 2048;
const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct CreateLinkRequest {
    pub destination_url: String,
    pub custom_alias: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct LinkService {
    repo: Arc<dyn LinkRepository>,
    minter: Arc<Minter>,
    safety: Arc<dyn SafetyOracle>,
    cache: Arc<CacheAside>,
}

impl LinkService {
    pub fn new(
        repo: Arc<dyn LinkRepository>,
        minter: Arc<Minter>,
        safety: Arc<dyn SafetyOracle>,
        cache: Arc<CacheAside>,
    ) -> Self {
        Self {
            repo,
            minter,
            safety,
            cache,
        }
    }

    /// Create a link for `creator_user_id`.
    ///
    /// Order matters: cheap syntactic checks, then the safety oracle
    /// (fail-closed), then minting and persistence. The cache warm-up at
    /// the end is best-effort.
    pub async fn create(
        &self,
        request: CreateLinkRequest,
        creator_user_id: &str,
    ) -> Result<Link> {
        validate_request(&request)?;

        // 安全判定失败即拒绝创建（fail closed）
        match self.safety.check(&request.destination_url).await? {
            Verdict::Flagged => {
                warn!(
                    destination = %request.destination_url,
                    "Destination flagged by safe browsing"
                );
                return Err(AppError::malicious_url(
                    "destination URL is flagged as malicious",
                ));
            }
            Verdict::Safe => {}
        }

        let id = self.minter.next()?;
        let short_code = match &request.custom_alias {
            Some(alias) => alias.clone(),
            None => codec::encode(id),
        };

        let link = self
            .repo
            .insert(NewLink {
                id: id as i64,
                short_code: short_code.clone(),
                // 存储原始 URL；规范化形式只用于安全哈希
                destination_url: request.destination_url.clone(),
                title: request.title.trim().to_string(),
                notes: request.notes.clone(),
                creator_user_id: creator_user_id.to_string(),
                expires_at: request.expires_at,
            })
            .await?;

        // 写穿缓存，失败只记日志；值的格式与解析路径共用 encode_cached
        let ttl = write_through_ttl(link.expires_at, Utc::now());
        self.cache
            .set(
                &redirect_cache_key(&short_code),
                &encode_cached(link.id, &link.destination_url),
                ttl,
            )
            .await;

        info!(
            short_code = %short_code,
            creator = %creator_user_id,
            "Link created"
        );
        Ok(link)
    }

    pub async fn list(&self, creator_user_id: &str) -> Result<Vec<Link>> {
        self.repo.list_by_creator(creator_user_id).await
    }

    /// Admin-driven status transition. Illegal transitions are rejected by
    /// the repository; any transition away from `active` drops the cache
    /// entry so stale redirects die immediately.
    pub async fn set_status(&self, id: i64, to: LinkStatus) -> Result<Link> {
        let link = self.repo.set_status(id, to).await?;
        self.cache
            .remove(&redirect_cache_key(&link.short_code))
            .await;
        Ok(link)
    }
}

/// Background policy: flip `active` links past their `expires_at` to
/// `expired` on a fixed cadence.
pub async fn run_expiry_sweep(
    repo: Arc<dyn LinkRepository>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match repo.mark_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(count) => debug!(count, "Expiry sweep flipped links to expired"),
                    Err(e) => warn!(error = %e, "Expiry sweep failed"),
                }
            }
            _ = shutdown.cancelled() => {
                debug!("Expiry sweep stopped");
                return;
            }
        }
    }
}

fn validate_request(request: &CreateLinkRequest) -> Result<()> {
    let destination = request.destination_url.trim();
    if destination.is_empty() {
        return Err(AppError::invalid_url("destination URL cannot be empty"));
    }
    if destination.len() > MAX_URL_LEN {
        return Err(AppError::invalid_url(format!(
            "destination URL exceeds {} characters",
            MAX_URL_LEN
        )));
    }

    let parsed = Url::parse(destination)
        .map_err(|e| AppError::invalid_url(format!("invalid destination URL: {}", e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::invalid_url(
            "destination URL must use http:// or https://",
        ));
    }
    if parsed.host_str().is_none() {
        return Err(AppError::invalid_url("destination URL must have a host"));
    }

    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::invalid_request("title is required"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(AppError::invalid_request(format!(
            "title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }

    if let Some(ref alias) = request.custom_alias {
        codec::validate_alias(alias)?;
    }

    if let Some(expires_at) = request.expires_at {
        if expires_at < Utc::now() + ChronoDuration::seconds(MIN_EXPIRY_LEAD_SECS) {
            return Err(AppError::invalid_request(
                "expires_at must be at least one minute in the future",
            ));
        }
    }

    Ok(())
}

/// min(距过期时间, 24 小时)
fn write_through_ttl(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    match expires_at {
        Some(expiry) => {
            let remaining = (expiry - now).num_seconds().max(1) as u64;
            Duration::from_secs(remaining).min(WRITE_THROUGH_TTL_CAP)
        }
        None => WRITE_THROUGH_TTL_CAP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(destination: &str) -> CreateLinkRequest {
        CreateLinkRequest {
            destination_url: destination.to_string(),
            custom_alias: None,
            title: "Example".to_string(),
            notes: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_validate_accepts_plain_request() {
        assert!(validate_request(&request("https://example.com/page")).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(validate_request(&request("")).is_err());
        assert!(validate_request(&request("not a url")).is_err());
        assert!(validate_request(&request("ftp://example.com")).is_err());
        assert!(validate_request(&request("javascript:alert(1)")).is_err());

        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert!(validate_request(&request(&long)).is_err());
    }

    #[test]
    fn test_validate_title_rules() {
        let mut r = request("https://example.com");
        r.title = "".to_string();
        assert!(validate_request(&r).is_err());

        r.title = "  ".to_string();
        assert!(validate_request(&r).is_err());

        r.title = "t".repeat(201);
        assert!(validate_request(&r).is_err());

        r.title = "t".repeat(200);
        assert!(validate_request(&r).is_ok());
    }

    #[test]
    fn test_validate_reserved_alias() {
        let mut r = request("https://example.com");
        r.custom_alias = Some("admin".to_string());
        let err = validate_request(&r).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_validate_expiry_lead_time() {
        let mut r = request("https://example.com");
        r.expires_at = Some(Utc::now() + ChronoDuration::seconds(30));
        assert!(validate_request(&r).is_err());

        r.expires_at = Some(Utc::now() + ChronoDuration::minutes(5));
        assert!(validate_request(&r).is_ok());

        r.expires_at = Some(Utc::now() - ChronoDuration::hours(1));
        assert!(validate_request(&r).is_err());
    }

    #[test]
    fn test_write_through_ttl_caps_at_24h() {
        let now = Utc::now();

        assert_eq!(write_through_ttl(None, now), WRITE_THROUGH_TTL_CAP);

        let far = now + ChronoDuration::days(30);
        assert_eq!(write_through_ttl(Some(far), now), WRITE_THROUGH_TTL_CAP);

        let soon = now + ChronoDuration::hours(2);
        let ttl = write_through_ttl(Some(soon), now);
        assert!(ttl <= Duration::from_secs(2 * 3600));
        assert!(ttl >= Duration::from_secs(2 * 3600 - 5));
    }
}
