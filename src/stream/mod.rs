//! Click-event broker
//!
//! One named append-only Redis stream. Entries carry a single `data` field
//! with a JSON-serialized click event. Consumers pull through a consumer
//! group (`XREADGROUP`), acknowledge by entry ID, and recover pending
//! entries by re-reading from position `0`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::errors::{AppError, Result};

/// Consumer-side view of the broker. The production implementation is
/// [`ClickStream`]; tests substitute an in-memory stream with the same
/// pending-list semantics.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// 创建消费组（MKSTREAM），组已存在不算错误
    async fn ensure_group(&self, group: &str) -> Result<()>;

    /// 按消费组读取一批条目
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
        position: ReadPosition,
    ) -> Result<Vec<StreamEntry>>;

    /// 按条目 ID 确认
    async fn ack(&self, group: &str, ids: &[String]) -> Result<()>;
}

/// 读取起点：`>` 为新消息，`0` 为本消费者的 pending 列表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPosition {
    New,
    Pending,
}

impl ReadPosition {
    fn as_id(&self) -> &'static str {
        match self {
            ReadPosition::New => ">",
            ReadPosition::Pending => "0",
        }
    }
}

/// 一条流内记录
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub data: String,
}

/// Redis Streams 客户端封装
pub struct ClickStream {
    connection: ConnectionManager,
    stream_key: String,
}

impl ClickStream {
    pub async fn connect(url: &str, stream_key: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            AppError::upstream_unavailable(format!("Failed to create Redis client: {e}"))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            AppError::upstream_unavailable(format!("Failed to create Redis ConnectionManager: {e}"))
        })?;

        Ok(Self {
            connection,
            stream_key: stream_key.to_string(),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// XADD，`MAXLEN ~` 近似截断防止流无限增长
    pub async fn publish(&self, payloads: &[String], max_stream_len: usize) -> Result<()> {
        let mut conn = self.connection.clone();
        for payload in payloads {
            conn.xadd_maxlen::<_, _, _, _, ()>(
                &self.stream_key,
                StreamMaxlen::Approx(max_stream_len),
                "*",
                &[("data", payload.as_str())],
            )
            .await?;
        }
        Ok(())
    }

    /// XGROUP CREATE ... MKSTREAM；组已存在（BUSYGROUP）不视为错误
    async fn ensure_group_impl(&self, group: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(&self.stream_key, group, "$")
            .await
        {
            Ok(()) => {
                info!(
                    "Consumer group '{}' created on stream '{}'",
                    group, self.stream_key
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group '{}' already exists", group);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// XREADGROUP GROUP g c COUNT n BLOCK ms STREAMS key <id>
    ///
    /// 超时（无消息）返回空集
    async fn read_group_impl(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
        position: ReadPosition,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.connection.clone();

        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[position.as_id()], &options)
            .await?;

        let mut entries = Vec::new();
        for stream in reply.keys {
            for record in stream.ids {
                let data = match record.map.get("data") {
                    Some(value) => redis::from_redis_value::<String>(value).map_err(|e| {
                        AppError::internal(format!(
                            "stream entry {} has non-string data field: {e}",
                            record.id
                        ))
                    })?,
                    // data 字段缺失交给上层按解析失败处理
                    None => String::new(),
                };
                entries.push(StreamEntry {
                    id: record.id,
                    data,
                });
            }
        }

        Ok(entries)
    }

    /// XACK，按条目 ID 确认
    async fn ack_impl(&self, group: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let _acked: u64 = conn.xack(&self.stream_key, group, ids).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStream for ClickStream {
    async fn ensure_group(&self, group: &str) -> Result<()> {
        self.ensure_group_impl(group).await
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
        position: ReadPosition,
    ) -> Result<Vec<StreamEntry>> {
        self.read_group_impl(group, consumer, count, block_ms, position)
            .await
    }

    async fn ack(&self, group: &str, ids: &[String]) -> Result<()> {
        self.ack_impl(group, ids).await
    }
}
