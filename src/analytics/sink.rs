use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, DbErr, EntityTrait};
use tracing::debug;

use crate::analytics::event::EnrichedClickEvent;
use crate::repository::entities::click_event;
use crate::repository::retry;

/// 分析事件写入端
///
/// 单次批量写入；实现必须保证同一 event_id 重放时幂等
/// （at-least-once 消费会产生重复投递）。
#[async_trait]
pub trait ClickEventSink: Send + Sync {
    async fn insert_batch(&self, events: &[EnrichedClickEvent]) -> anyhow::Result<()>;
}

/// sea-orm 批量写入实现
///
/// `on_conflict(event_id).do_nothing()` 使重放成为空操作。
pub struct SeaOrmClickSink {
    db: DatabaseConnection,
    retry_config: retry::RetryConfig,
}

impl SeaOrmClickSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            retry_config: retry::RetryConfig::default(),
        }
    }
}

#[async_trait]
impl ClickEventSink for SeaOrmClickSink {
    async fn insert_batch(&self, events: &[EnrichedClickEvent]) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let models: Vec<click_event::ActiveModel> = events
            .iter()
            .map(|enriched| {
                let event = &enriched.event;
                click_event::ActiveModel {
                    event_id: Set(event.event_id),
                    time: Set(event.timestamp),
                    url_id: Set(event.url_id),
                    short_code: Set(event.short_code.clone()),
                    referrer: Set(event.referrer.clone()),
                    user_agent: Set(event.user_agent.clone()),
                    ip_address: Set(event.ip_address.to_string()),
                    visitor_hash: Set(enriched.visitor_hash.clone()),
                    country_code: Set(event.country_code.clone()),
                    country_name: Set(event.country_name.clone()),
                    city: Set(event.city.clone()),
                    latitude: Set(event.latitude),
                    longitude: Set(event.longitude),
                    device_type: Set(enriched.device_type.clone()),
                    browser: Set(event.browser.clone()),
                    operating_system: Set(event.operating_system.clone()),
                }
            })
            .collect();

        let count = models.len();
        let db = &self.db;

        let result = retry::with_retry("insert_click_events", self.retry_config, || {
            let models = models.clone();
            async move {
                click_event::Entity::insert_many(models)
                    .on_conflict(
                        OnConflict::column(click_event::Column::EventId)
                            .do_nothing()
                            .to_owned(),
                    )
                    .exec(db)
                    .await
                    .map(|_| ())
            }
        })
        .await;

        match result {
            Ok(()) => {
                debug!("Inserted batch of {} click events", count);
                Ok(())
            }
            // 整批都是重复 event_id（重放场景），视为成功
            Err(DbErr::RecordNotInserted) => {
                debug!("Batch of {} click events were all replayed duplicates", count);
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("batch insert failed: {}", e)),
        }
    }
}

/// 内存实现，测试用
pub struct MemoryClickSink {
    rows: std::sync::Mutex<Vec<EnrichedClickEvent>>,
    fail_remaining: std::sync::atomic::AtomicUsize,
}

impl MemoryClickSink {
    pub fn new() -> Self {
        Self {
            rows: std::sync::Mutex::new(Vec::new()),
            fail_remaining: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// 让接下来的 n 次插入失败
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<EnrichedClickEvent> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryClickSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClickEventSink for MemoryClickSink {
    async fn insert_batch(&self, events: &[EnrichedClickEvent]) -> anyhow::Result<()> {
        use std::sync::atomic::Ordering;

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("injected sink failure ({} more to come)", remaining - 1);
        }

        let mut rows = self.rows.lock().unwrap();
        // 幂等：按 event_id 去重，模拟 on_conflict do_nothing
        for event in events {
            if !rows
                .iter()
                .any(|row| row.event.event_id == event.event.event_id)
            {
                rows.push(event.clone());
            }
        }
        Ok(())
    }
}
