//! 数据库操作重试模块
//!
//! 对连接类错误提供指数退避重试

use sea_orm::DbErr;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 判断数据库错误是否可重试
pub fn is_retryable_error(err: &DbErr) -> bool {
    matches!(
        err,
        DbErr::ConnectionAcquire(_) | // 连接池获取失败
        DbErr::Conn(_) // 连接问题
    )
}

/// 重试配置
#[derive(Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// 指数退避重试执行器
///
/// 仅对可重试错误生效，退避时加入随机抖动
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("操作 '{}' 在第 {} 次重试后成功", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if is_retryable_error(&e) && attempt < config.max_retries => {
                attempt += 1;
                let delay = calculate_backoff(attempt, config.base_delay_ms, config.max_delay_ms);
                warn!(
                    "操作 '{}' 失败 (尝试 {}/{}): {}，{} 毫秒后重试",
                    operation_name,
                    attempt,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => {
                if !is_retryable_error(&e) {
                    debug!("操作 '{}' 失败，错误不可重试: {}", operation_name, e);
                }
                return Err(e);
            }
        }
    }
}

/// 计算指数退避延迟（带抖动）
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    use rand::Rng;
    let exp_delay = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp_delay.min(max_ms);
    let jitter = rand::rng().random_range(0..=capped / 4);
    capped.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 1..20 {
            let delay = calculate_backoff(attempt, 100, 2000);
            // 上限 + 25% 抖动
            assert!(delay <= 2500, "attempt {} delay {} over cap", attempt, delay);
        }
    }

    #[test]
    fn test_backoff_grows() {
        // 抖动最多 25%，前几档的下界依然单调
        assert!(calculate_backoff(1, 100, 60_000) < calculate_backoff(3, 100, 60_000) * 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let mut calls = 0;
        let result: Result<(), DbErr> = with_retry(
            "test",
            RetryConfig::default(),
            || {
                calls += 1;
                async { Err(DbErr::Custom("boom".into())) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
