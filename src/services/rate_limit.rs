//! Per-user rate limiting
//!
//! Sliding window over two adjacent fixed windows: the previous window's
//! count contributes proportionally to how much of it still overlaps the
//! sliding window. Counters live in Redis (one `INCR`ed key per window,
//! expiring after two windows); when Redis is unreachable an in-process
//! fallback map with per-key mutexes takes over so the API keeps serving.

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// 窗口重置时刻（Unix 秒），回给 X-RateLimit-Reset
    pub reset_unix: i64,
}

struct WindowCounter {
    window_index: i64,
    current: u64,
    previous: u64,
}

pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    fallback: DashMap<String, Arc<Mutex<WindowCounter>>>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(redis: Option<ConnectionManager>, config: &RateLimitConfig) -> Self {
        Self {
            redis,
            fallback: DashMap::new(),
            limit: config.per_user,
            window: Duration::from_secs(config.window_secs.max(1)),
        }
    }

    /// Count this request against `user_id` and decide.
    pub async fn check(&self, user_id: &str) -> RateLimitDecision {
        let now_unix = chrono::Utc::now().timestamp();
        let window_secs = self.window.as_secs() as i64;
        let window_index = now_unix.div_euclid(window_secs);
        let elapsed_frac = now_unix.rem_euclid(window_secs) as f64 / window_secs as f64;

        let counts = match self.redis.clone() {
            Some(conn) => match self.count_redis(conn, user_id, window_index).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        error = %e,
                        "Redis unavailable, using in-memory rate limiter"
                    );
                    self.count_in_memory(user_id, window_index)
                }
            },
            None => self.count_in_memory(user_id, window_index),
        };

        let weighted = weighted_count(counts.previous, counts.current, elapsed_frac);
        let remaining = (self.limit as f64 - weighted).max(0.0) as u64;

        RateLimitDecision {
            allowed: weighted <= self.limit as f64,
            limit: self.limit,
            remaining,
            reset_unix: (window_index + 1) * window_secs,
        }
    }

    async fn count_redis(
        &self,
        mut conn: ConnectionManager,
        user_id: &str,
        window_index: i64,
    ) -> redis::RedisResult<Counts> {
        let current_key = format!("ratelimit:user:{}:{}", user_id, window_index);
        let previous_key = format!("ratelimit:user:{}:{}", user_id, window_index - 1);

        let current: u64 = conn.incr(&current_key, 1u64).await?;
        if current == 1 {
            // 两个窗口后计数对滑动计算再无贡献
            let _: () = conn.expire(&current_key, self.window.as_secs() as i64 * 2).await?;
        }

        let previous: Option<u64> = conn.get(&previous_key).await?;

        Ok(Counts {
            current,
            previous: previous.unwrap_or(0),
        })
    }

    fn count_in_memory(&self, user_id: &str, window_index: i64) -> Counts {
        let counter = self
            .fallback
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(WindowCounter {
                    window_index,
                    current: 0,
                    previous: 0,
                }))
            })
            .clone();

        let mut counter = counter.lock().expect("rate limit counter mutex poisoned");

        if counter.window_index != window_index {
            counter.previous = if counter.window_index == window_index - 1 {
                counter.current
            } else {
                // 隔了超过一个窗口，历史计数全部过期
                0
            };
            counter.current = 0;
            counter.window_index = window_index;
        }

        counter.current += 1;
        Counts {
            current: counter.current,
            previous: counter.previous,
        }
    }
}

struct Counts {
    current: u64,
    previous: u64,
}

/// 上一窗口按剩余重叠比例加权 + 当前窗口全额
fn weighted_count(previous: u64, current: u64, elapsed_frac: f64) -> f64 {
    previous as f64 * (1.0 - elapsed_frac) + current as f64
}
