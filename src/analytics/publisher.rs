//! Click-event producer
//!
//! Publishing must never slow a redirect down: events go into an in-memory
//! buffer and a background task pushes them onto the stream when the buffer
//! reaches `batch_size`, when the flush interval elapses, and once more on
//! shutdown. If the broker is down the buffer is bounded: beyond
//! `max_buffer_size` the oldest events are dropped with a warning.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::analytics::event::ClickEvent;
use crate::config::EventsConfig;
use crate::stream::ClickStream;
use crate::system::signal::ShutdownSignal;

pub struct ClickPublisher {
    stream: Arc<ClickStream>,
    buffer: Mutex<Vec<ClickEvent>>,
    batch_size: usize,
    flush_interval_ms: u64,
    max_buffer_size: usize,
    max_stream_len: usize,
}

impl ClickPublisher {
    pub fn new(stream: Arc<ClickStream>, config: &EventsConfig) -> Self {
        Self {
            stream,
            buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            batch_size: config.batch_size,
            flush_interval_ms: config.flush_interval_ms,
            max_buffer_size: config.max_buffer_size,
            max_stream_len: config.max_stream_len,
        }
    }

    /// 非阻塞发布：入缓冲，达到批量阈值时后台刷出
    pub fn publish(self: &Arc<Self>, event: ClickEvent) {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            let should_flush = {
                let mut buffer = publisher.buffer.lock().await;
                if buffer.len() >= publisher.max_buffer_size {
                    // 缓冲溢出保护：丢弃最旧的事件
                    let drop_count = buffer.len() - publisher.max_buffer_size + 1;
                    warn!(
                        drop_count,
                        max_buffer_size = publisher.max_buffer_size,
                        "Click buffer overflow, dropping oldest events"
                    );
                    buffer.drain(0..drop_count);
                }
                buffer.push(event);
                buffer.len() >= publisher.batch_size
            };

            if should_flush {
                if let Err(e) = publisher.flush().await {
                    warn!(error = %e, "Failed to flush click events to stream");
                }
            }
        });
    }

    /// 后台定时刷出任务；收到关闭信号后做最后一次 flush 再退出
    pub async fn run_flush_task(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.flush_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "Periodic click flush failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "Final click flush on shutdown failed");
                    }
                    debug!("Click publisher flush task stopped");
                    return;
                }
            }
        }
    }

    /// 把缓冲中的全部事件写入流
    pub async fn flush(&self) -> crate::errors::Result<()> {
        let events: Vec<ClickEvent> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if events.is_empty() {
            return Ok(());
        }

        let count = events.len();
        let mut payloads = Vec::with_capacity(count);
        for event in &events {
            payloads.push(serde_json::to_string(event)?);
        }

        match self
            .stream
            .publish(&payloads, self.max_stream_len)
            .await
        {
            Ok(()) => {
                debug!(count, "Flushed click events to stream");
                Ok(())
            }
            Err(e) => {
                // 发布失败把事件放回缓冲，等下一轮重试
                let mut buffer = self.buffer.lock().await;
                let mut restored = events;
                restored.extend(buffer.drain(..));
                *buffer = restored;
                Err(e)
            }
        }
    }

    /// 当前缓冲大小（监控用）
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}
