//! Redirect resolution integration tests
//!
//! 验证 cache-aside 行为：命中、回源、负缓存、single-flight 下
//! 同一 code 的并发未命中至多一次数据库读。

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use linkhop::cache::{CacheAside, MemoryCacheStore};
use linkhop::errors::{AppError, Result};
use linkhop::repository::{ClickCountUpdate, Link, LinkRepository, LinkStatus, NewLink};
use linkhop::services::{CacheTier, RedirectService};

struct MockRepo {
    links: Mutex<HashMap<String, Link>>,
    find_calls: AtomicUsize,
}

impl MockRepo {
    fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            find_calls: AtomicUsize::new(0),
        }
    }

    fn with_link(self, link: Link) -> Self {
        self.links
            .lock()
            .unwrap()
            .insert(link.short_code.clone(), link);
        self
    }

    fn find_count(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkRepository for MockRepo {
    async fn insert(&self, new_link: NewLink) -> Result<Link> {
        let mut links = self.links.lock().unwrap();
        if links.contains_key(&new_link.short_code) {
            return Err(AppError::alias_taken("taken"));
        }
        let link = make_link(
            new_link.id,
            &new_link.short_code,
            &new_link.destination_url,
            LinkStatus::Active,
            new_link.expires_at,
        );
        links.insert(new_link.short_code.clone(), link.clone());
        Ok(link)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        // 放大数据库往返窗口，让并发未命中真正交叠
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(self.links.lock().unwrap().get(code).cloned())
    }

    async fn list_by_creator(&self, creator: &str) -> Result<Vec<Link>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.creator_user_id == creator)
            .cloned()
            .collect())
    }

    async fn set_status(&self, _id: i64, _to: LinkStatus) -> Result<Link> {
        Err(AppError::internal("not used in this test"))
    }

    async fn mark_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }

    async fn record_clicks(&self, _updates: &[ClickCountUpdate]) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn make_link(
    id: i64,
    code: &str,
    destination: &str,
    status: LinkStatus,
    expires_at: Option<DateTime<Utc>>,
) -> Link {
    let now = Utc::now();
    Link {
        id,
        short_code: code.to_string(),
        destination_url: destination.to_string(),
        title: "Example".into(),
        notes: None,
        creator_user_id: "user-1".into(),
        created_at: now,
        updated_at: now,
        expires_at,
        status,
        total_clicks: 0,
        last_clicked_at: None,
    }
}

fn service(repo: Arc<MockRepo>) -> RedirectService {
    let cache = Arc::new(CacheAside::new(Arc::new(MemoryCacheStore::new(1000))));
    service_with_cache(repo, cache)
}

fn service_with_cache(repo: Arc<MockRepo>, cache: Arc<CacheAside>) -> RedirectService {
    RedirectService::new(repo, cache)
}

#[tokio::test]
async fn test_miss_then_hit() {
    let repo = Arc::new(
        MockRepo::new().with_link(make_link(1, "abc", "https://example.com/x", LinkStatus::Active, None)),
    );
    let service = service(repo.clone());

    let first = service.resolve("abc").await.unwrap();
    assert_eq!(first.destination_url, "https://example.com/x");
    assert_eq!(first.url_id, 1);
    assert_eq!(first.cache_tier, CacheTier::Db);
    assert_eq!(repo.find_count(), 1);

    let second = service.resolve("abc").await.unwrap();
    assert_eq!(second.cache_tier, CacheTier::Cache);
    assert_eq!(repo.find_count(), 1, "second resolve must be a cache hit");
}

#[tokio::test]
async fn test_concurrent_misses_cost_one_database_read() {
    let repo = Arc::new(
        MockRepo::new().with_link(make_link(7, "hot", "https://example.com/hot", LinkStatus::Active, None)),
    );
    let service = Arc::new(service(repo.clone()));

    let mut handles = vec![];
    for _ in 0..25 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.resolve("hot").await.unwrap().destination_url
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "https://example.com/hot");
    }

    assert_eq!(
        repo.find_count(),
        1,
        "single-flight guarantees at most one DB read per miss"
    );
}

#[tokio::test]
async fn test_unknown_code_is_not_found_and_negatively_cached() {
    let repo = Arc::new(MockRepo::new());
    let service = service(repo.clone());

    let err = service.resolve("ghost").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(repo.find_count(), 1);

    // 负缓存命中，不再回源
    let err = service.resolve("ghost").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(repo.find_count(), 1, "negative marker must absorb the retry");
}

#[tokio::test]
async fn test_corrupt_cache_entry_falls_through_to_database() {
    let repo = Arc::new(
        MockRepo::new().with_link(make_link(9, "abc", "https://example.com/x", LinkStatus::Active, None)),
    );
    let cache = Arc::new(CacheAside::new(Arc::new(MemoryCacheStore::new(1000))));

    // 预埋一条不符合线格式的脏数据
    cache
        .set(
            "redirect:abc",
            "garbage-without-separator",
            std::time::Duration::from_secs(60),
        )
        .await;

    let service = service_with_cache(repo.clone(), cache.clone());

    // 缓存坏条目必须降级回源，而不是 500 外传
    let resolved = service.resolve("abc").await.unwrap();
    assert_eq!(resolved.destination_url, "https://example.com/x");
    assert_eq!(resolved.url_id, 9);
    assert_eq!(repo.find_count(), 1);

    // 坏条目已被修复，第二次命中缓存
    let again = service.resolve("abc").await.unwrap();
    assert_eq!(again.cache_tier, CacheTier::Cache);
    assert_eq!(repo.find_count(), 1, "repaired entry must serve the retry");
}

#[tokio::test]
async fn test_expired_and_inactive_links_are_not_served() {
    let past = Utc::now() - ChronoDuration::hours(1);
    let repo = Arc::new(
        MockRepo::new()
            .with_link(make_link(1, "dead", "https://example.com/a", LinkStatus::Active, Some(past)))
            .with_link(make_link(2, "off", "https://example.com/b", LinkStatus::Disabled, None))
            .with_link(make_link(3, "gone", "https://example.com/c", LinkStatus::Deleted, None)),
    );
    let service = service(repo.clone());

    for code in ["dead", "off", "gone"] {
        let err = service.resolve(code).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND", "{} must not resolve", code);
    }
}
