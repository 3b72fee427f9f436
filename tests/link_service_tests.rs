//! Link creation flow integration tests
//!
//! Mock 的安全判定与仓储驱动完整 create 流程：校验顺序、fail-closed、
//! 恶意拦截、别名冲突（并发下恰好一个成功）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use linkhop::cache::{CacheAside, CacheLookup, MemoryCacheStore};
use linkhop::errors::{AppError, Result};
use linkhop::minter::Minter;
use linkhop::repository::{ClickCountUpdate, Link, LinkRepository, LinkStatus, NewLink};
use linkhop::safebrowsing::{SafetyOracle, Verdict};
use linkhop::services::{CacheTier, CreateLinkRequest, LinkService, RedirectService};

struct MockOracle {
    verdict: Verdict,
    fail: bool,
    calls: AtomicUsize,
}

impl MockOracle {
    fn safe() -> Self {
        Self {
            verdict: Verdict::Safe,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn flagged() -> Self {
        Self {
            verdict: Verdict::Flagged,
            ..Self::safe()
        }
    }

    fn unavailable() -> Self {
        Self {
            fail: true,
            ..Self::safe()
        }
    }
}

#[async_trait]
impl SafetyOracle for MockOracle {
    async fn check(&self, _raw_url: &str) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::upstream_unavailable("oracle down"));
        }
        Ok(self.verdict)
    }
}

struct MockRepo {
    links: Mutex<HashMap<String, Link>>,
}

impl MockRepo {
    fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
        }
    }

    fn len(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl LinkRepository for MockRepo {
    async fn insert(&self, new_link: NewLink) -> Result<Link> {
        // 唯一约束在锁内判定，模拟数据库对并发插入的串行化
        let mut links = self.links.lock().unwrap();
        if links.contains_key(&new_link.short_code) {
            return Err(AppError::alias_taken(format!(
                "short code '{}' is already in use",
                new_link.short_code
            )));
        }

        let now = Utc::now();
        let link = Link {
            id: new_link.id,
            short_code: new_link.short_code.clone(),
            destination_url: new_link.destination_url,
            title: new_link.title,
            notes: new_link.notes,
            creator_user_id: new_link.creator_user_id,
            created_at: now,
            updated_at: now,
            expires_at: new_link.expires_at,
            status: LinkStatus::Active,
            total_clicks: 0,
            last_clicked_at: None,
        };
        links.insert(new_link.short_code, link.clone());
        Ok(link)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>> {
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

struct Fixture {
    service: Arc<LinkService>,
    repo: Arc<MockRepo>,
    oracle: Arc<MockOracle>,
    cache: Arc<CacheAside>,
}

fn fixture(oracle: MockOracle) -> Fixture {
    let repo = Arc::new(MockRepo::new());
    let oracle = Arc::new(oracle);
    let cache = Arc::new(CacheAside::new(Arc::new(MemoryCacheStore::new(1000))));
    let service = Arc::new(LinkService::new(
        repo.clone(),
        Arc::new(Minter::new(9).unwrap()),
        oracle.clone(),
        cache.clone(),
    ));
    Fixture {
        service,
        repo,
        oracle,
        cache,
    }
}

fn request(destination: &str, alias: Option<&str>) -> CreateLinkRequest {
    CreateLinkRequest {
        destination_url: destination.to_string(),
        custom_alias: alias.map(String::from),
        title: "My link".to_string(),
        notes: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_create_mints_code_and_warms_cache() {
    let f = fixture(MockOracle::safe());

    let link = f
        .service
        .create(request("https://example.com/page", None), "user-1")
        .await
        .unwrap();

    assert!(!link.short_code.is_empty());
    assert_eq!(link.status, LinkStatus::Active);
    assert_eq!(link.creator_user_id, "user-1");
    assert_eq!(f.oracle.calls.load(Ordering::SeqCst), 1);

    // 写穿缓存生效，且值遵守 "<url_id>|<destination>" 的线格式
    let key = format!("redirect:{}", link.short_code);
    match f.cache.get(&key).await {
        CacheLookup::Hit(value) => {
            let (id, destination) = value
                .split_once('|')
                .expect("cache value must be '<url_id>|<destination>'");
            assert_eq!(id.parse::<i64>().unwrap(), link.id);
            assert_eq!(destination, "https://example.com/page");
        }
        CacheLookup::Miss => panic!("write-through entry missing"),
    }
}

#[tokio::test]
async fn test_create_then_resolve_golden_path() {
    // 创建与解析共享同一套 CacheAside / 仓储：create 写穿的条目
    // 必须能被 RedirectService 直接消费
    let f = fixture(MockOracle::safe());
    let redirect = RedirectService::new(f.repo.clone(), f.cache.clone());

    let link = f
        .service
        .create(request("https://example.com/landing", None), "user-1")
        .await
        .unwrap();

    let resolved = redirect.resolve(&link.short_code).await.unwrap();
    assert_eq!(resolved.destination_url, "https://example.com/landing");
    assert_eq!(resolved.url_id, link.id);
    assert_eq!(
        resolved.cache_tier,
        CacheTier::Cache,
        "the write-through entry must satisfy the resolve fast path"
    );

    // 自定义别名同样走完整链路
    let aliased = f
        .service
        .create(
            request("https://example.com/promo", Some("promo-2026")),
            "user-1",
        )
        .await
        .unwrap();

    let resolved = redirect.resolve("promo-2026").await.unwrap();
    assert_eq!(resolved.destination_url, "https://example.com/promo");
    assert_eq!(resolved.url_id, aliased.id);
    assert_eq!(resolved.cache_tier, CacheTier::Cache);
}

#[tokio::test]
async fn test_custom_alias_is_used_verbatim() {
    let f = fixture(MockOracle::safe());

    let link = f
        .service
        .create(request("https://example.com", Some("My-Alias-42")), "user-1")
        .await
        .unwrap();
    assert_eq!(link.short_code, "My-Alias-42");
}

#[tokio::test]
async fn test_flagged_destination_is_rejected() {
    let f = fixture(MockOracle::flagged());

    let err = f
        .service
        .create(request("https://evil.example/", None), "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MALICIOUS_URL");
    assert_eq!(f.repo.len(), 0, "flagged links must not be persisted");
}

#[tokio::test]
async fn test_oracle_outage_fails_closed() {
    let f = fixture(MockOracle::unavailable());

    let err = f
        .service
        .create(request("https://example.com", None), "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UPSTREAM_UNAVAILABLE");
    assert_eq!(f.repo.len(), 0);
}

#[tokio::test]
async fn test_validation_rejects_before_oracle_runs() {
    let f = fixture(MockOracle::safe());

    let err = f
        .service
        .create(request("ftp://example.com", None), "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_URL");

    let err = f
        .service
        .create(request("https://example.com", Some("admin")), "user-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    assert_eq!(
        f.oracle.calls.load(Ordering::SeqCst),
        0,
        "syntactic validation must short-circuit the oracle"
    );
}

#[tokio::test]
async fn test_concurrent_creates_of_same_alias_yield_one_winner() {
    let f = fixture(MockOracle::safe());

    let mut handles = vec![];
    for _ in 0..2 {
        let service = Arc::clone(&f.service);
        handles.push(tokio::spawn(async move {
            service
                .create(request("https://example.com", Some("launch-day")), "user-1")
                .await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) if e.code() == "ALIAS_TAKEN" => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(created, 1, "exactly one create wins");
    assert_eq!(conflicts, 1, "the loser sees ALIAS_TAKEN");
    assert_eq!(f.repo.len(), 1);
}

#[tokio::test]
async fn test_list_returns_only_callers_links() {
    let f = fixture(MockOracle::safe());

    f.service
        .create(request("https://example.com/a", None), "alice")
        .await
        .unwrap();
    f.service
        .create(request("https://example.com/b", None), "bob")
        .await
        .unwrap();

    let alices = f.service.list("alice").await.unwrap();
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].creator_user_id, "alice");
}
