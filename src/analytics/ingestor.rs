//! Click-stream consumer loop
//!
//! One long-running loop per process, keyed by `(stream, group, consumer)`.
//! Each iteration block-reads a batch, parses and enriches it, and flushes
//! to the analytics store when the batch fills or the flush ticker fires.
//! Acknowledgement happens strictly after the insert, giving at-least-once
//! delivery; downstream idempotence comes from `event_id`.
//!
//! Recovery paths share the main loop: the reader alternates between `>`
//! (new entries) and `0` (this consumer's pending list). Startup, the
//! periodic sweep, a parse failure and a persistent insert failure all
//! steer the reader back to the pending list, so nothing that was read but
//! never acked can be lost.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::analytics::enrich::Enricher;
use crate::analytics::event::{ClickEvent, EnrichedClickEvent};
use crate::analytics::sink::ClickEventSink;
use crate::config::IngestorConfig;
use crate::errors::Result;
use crate::repository::retry::calculate_backoff;
use crate::repository::{ClickCountUpdate, LinkRepository};
use crate::stream::{EventStream, ReadPosition, StreamEntry};
use crate::system::signal::ShutdownSignal;

/// 解析失败后的冷却时间
const PARSE_FAILURE_PAUSE: Duration = Duration::from_secs(1);
/// 插入重试次数上限，超过后整批留在 pending 列表等待重投
const MAX_INSERT_ATTEMPTS: u32 = 5;
/// 瞬时 broker 错误的退避基数
const BROKER_BACKOFF_BASE_MS: u64 = 500;

#[derive(Default)]
struct Batch {
    events: Vec<EnrichedClickEvent>,
    entry_ids: Vec<String>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn clear(&mut self) {
        self.events.clear();
        self.entry_ids.clear();
    }
}

pub struct ClickIngestor {
    stream: Arc<dyn EventStream>,
    sink: Arc<dyn ClickEventSink>,
    /// 链接聚合的计数冗余（total_clicks / last_clicked_at），尽力而为
    link_repo: Option<Arc<dyn LinkRepository>>,
    enricher: Arc<Enricher>,
    config: IngestorConfig,
}

impl ClickIngestor {
    pub fn new(
        stream: Arc<dyn EventStream>,
        sink: Arc<dyn ClickEventSink>,
        link_repo: Option<Arc<dyn LinkRepository>>,
        enricher: Arc<Enricher>,
        config: IngestorConfig,
    ) -> Self {
        Self {
            stream,
            sink,
            link_repo,
            enricher,
            config,
        }
    }

    /// Run until the shutdown signal fires. Any accumulated batch is
    /// flushed before returning.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            batch_size = self.config.batch_size,
            block_ms = self.config.block_ms,
            "Click ingestor starting"
        );

        self.ensure_group_with_retry(&shutdown).await?;

        let flush_interval = Duration::from_secs(self.config.flush_interval_secs);
        let sweep_interval = Duration::from_secs(self.config.pending_sweep_secs);

        let mut batch = Batch::default();
        let mut last_flush = Instant::now();
        let mut last_sweep = Instant::now();
        // 启动先扫 pending：补上一次崩溃在 insert 与 ack 之间留下的账
        let mut position = ReadPosition::Pending;
        let mut broker_errors: u32 = 0;

        loop {
            if shutdown.is_shutdown() {
                debug!("Shutdown requested, flushing final batch");
                self.flush(&mut batch).await;
                break;
            }

            if last_sweep.elapsed() >= sweep_interval {
                last_sweep = Instant::now();
                position = ReadPosition::Pending;
            }

            if !batch.is_empty() && last_flush.elapsed() >= flush_interval {
                if !self.flush(&mut batch).await {
                    position = ReadPosition::Pending;
                }
                last_flush = Instant::now();
            }

            let entries = match self
                .stream
                .read_group(
                    &self.config.group,
                    &self.config.consumer,
                    self.config.batch_size,
                    self.config.block_ms,
                    position,
                )
                .await
            {
                Ok(entries) => {
                    broker_errors = 0;
                    entries
                }
                Err(e) => {
                    broker_errors = broker_errors.saturating_add(1);
                    let delay = calculate_backoff(
                        broker_errors,
                        BROKER_BACKOFF_BASE_MS,
                        self.config.retry_max_backoff_ms,
                    );
                    error!(error = %e, attempt = broker_errors, delay_ms = delay, "Stream read failed, backing off");
                    sleep(Duration::from_millis(delay)).await;
                    continue;
                }
            };

            if entries.is_empty() {
                if position == ReadPosition::Pending {
                    // pending 列表已清空，回到新消息
                    position = ReadPosition::New;
                }
                continue;
            }

            let parsed = match parse_entries(&entries) {
                Ok(parsed) => parsed,
                Err(e) => {
                    // 整批失败，不确认：schema 漂移必须显性暴露，
                    // 而不是静默丢数据
                    error!(
                        error = %e,
                        entry_count = entries.len(),
                        "Failed to decode click events (NOT acking)"
                    );
                    sleep(PARSE_FAILURE_PAUSE).await;
                    // 这批条目已进入 pending 列表，从那里重试
                    position = ReadPosition::Pending;
                    continue;
                }
            };

            for (entry_id, event) in parsed {
                let enriched = self.enricher.enrich(event).await;
                batch.events.push(enriched);
                batch.entry_ids.push(entry_id);
            }

            // pending 重放立即落库确认，否则下一次 `0` 读取会把同一批
            // 条目再读一遍
            if batch.len() >= self.config.batch_size || position == ReadPosition::Pending {
                if !self.flush(&mut batch).await {
                    position = ReadPosition::Pending;
                }
                last_flush = Instant::now();
            }
        }

        info!("Click ingestor stopped");
        Ok(())
    }

    async fn ensure_group_with_retry(&self, shutdown: &ShutdownSignal) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.stream.ensure_group(&self.config.group).await {
                Ok(()) => return Ok(()),
                Err(e) if !shutdown.is_shutdown() => {
                    attempt = attempt.saturating_add(1);
                    let delay = calculate_backoff(
                        attempt,
                        BROKER_BACKOFF_BASE_MS,
                        self.config.retry_max_backoff_ms,
                    );
                    warn!(error = %e, delay_ms = delay, "Failed to ensure consumer group, retrying");
                    sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Insert the batch, then ack. Returns false when the batch had to be
    /// abandoned to the pending list (persistent insert failure).
    async fn flush(&self, batch: &mut Batch) -> bool {
        if batch.is_empty() {
            return true;
        }

        let count = batch.len();
        let mut attempt: u32 = 0;
        loop {
            match self.sink.insert_batch(&batch.events).await {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_INSERT_ATTEMPTS {
                        // 放弃本地批次但不确认：条目仍在 pending 列表，
                        // 留待后续扫描重投
                        error!(
                            error = %e,
                            count,
                            "Insert failed after {} attempts, leaving batch unacknowledged",
                            MAX_INSERT_ATTEMPTS
                        );
                        batch.clear();
                        return false;
                    }
                    let delay = calculate_backoff(
                        attempt,
                        BROKER_BACKOFF_BASE_MS,
                        self.config.retry_max_backoff_ms,
                    );
                    warn!(error = %e, attempt, delay_ms = delay, "Insert failed, retrying");
                    sleep(Duration::from_millis(delay)).await;
                }
            }
        }

        // 冗余计数尽力而为：权威数据已在分析表里
        if let Some(ref link_repo) = self.link_repo {
            let updates = aggregate_counts(&batch.events);
            if let Err(e) = link_repo.record_clicks(&updates).await {
                warn!(error = %e, "Failed to bump link click counters");
            }
        }

        // ack 严格在 insert 之后；ack 失败只会造成重复投递，
        // 由 event_id 幂等兜底
        if let Err(e) = self.stream.ack(&self.config.group, &batch.entry_ids).await {
            error!(error = %e, count, "Failed to ack batch (duplicates possible)");
        } else {
            debug!(count, "Batch inserted and acked");
        }

        batch.clear();
        true
    }
}

fn parse_entries(entries: &[StreamEntry]) -> std::result::Result<Vec<(String, ClickEvent)>, String> {
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.data.is_empty() {
            return Err(format!("missing data field in stream entry {}", entry.id));
        }
        let event: ClickEvent = serde_json::from_str(&entry.data)
            .map_err(|e| format!("bad click event json in entry {}: {}", entry.id, e))?;
        parsed.push((entry.id.clone(), event));
    }
    Ok(parsed)
}

/// 按 url_id 聚合一批事件的计数增量
fn aggregate_counts(events: &[EnrichedClickEvent]) -> Vec<ClickCountUpdate> {
    let mut by_url: std::collections::HashMap<i64, ClickCountUpdate> =
        std::collections::HashMap::new();

    for enriched in events {
        let event = &enriched.event;
        by_url
            .entry(event.url_id)
            .and_modify(|update| {
                update.count += 1;
                if event.timestamp > update.last_clicked_at {
                    update.last_clicked_at = event.timestamp;
                }
            })
            .or_insert(ClickCountUpdate {
                url_id: event.url_id,
                count: 1,
                last_clicked_at: event.timestamp,
            });
    }

    by_url.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    fn enriched(url_id: i64, at: chrono::DateTime<Utc>) -> EnrichedClickEvent {
        EnrichedClickEvent {
            event: ClickEvent {
                event_id: Uuid::new_v4(),
                url_id,
                short_code: "c".into(),
                timestamp: at,
                user_agent: "ua".into(),
                ip_address: "203.0.113.1".parse().unwrap(),
                referrer: None,
                country_code: None,
                country_name: None,
                city: None,
                latitude: None,
                longitude: None,
                device_type: None,
                browser: None,
                operating_system: None,
                cache_tier: None,
                latency_ms: None,
                request_id: None,
            },
            visitor_hash: "h".into(),
            device_type: "desktop".into(),
        }
    }

    #[test]
    fn test_aggregate_counts_groups_by_url() {
        let now = Utc::now();
        let later = now + ChronoDuration::seconds(30);
        let events = vec![
            enriched(1, now),
            enriched(1, later),
            enriched(2, now),
        ];

        let mut updates = aggregate_counts(&events);
        updates.sort_by_key(|u| u.url_id);

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].url_id, 1);
        assert_eq!(updates[0].count, 2);
        assert_eq!(updates[0].last_clicked_at, later);
        assert_eq!(updates[1].count, 1);
    }

    #[test]
    fn test_parse_entries_fails_whole_batch() {
        let good = StreamEntry {
            id: "1-0".into(),
            data: serde_json::to_string(&enriched(1, Utc::now()).event).unwrap(),
        };
        let bad = StreamEntry {
            id: "2-0".into(),
            data: "{not json".into(),
        };

        assert!(parse_entries(std::slice::from_ref(&good)).is_ok());
        assert!(parse_entries(&[good.clone(), bad]).is_err());

        let missing = StreamEntry {
            id: "3-0".into(),
            data: String::new(),
        };
        assert!(parse_entries(&[missing]).is_err());
    }
}
