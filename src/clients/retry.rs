//! 有界重试策略 (指数退避)
//!
//! 退避时长是纯函数, 与实际等待分离, 测试时用零退避即可。

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数 (含第一次)
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// 无等待, 用于测试
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
        }
    }

    /// 第 attempt 次 (从 1 开始) 失败后的等待时长
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// 反复调用 f 直到拿到 Some, 最多 max_attempts 次; 错误立即返回
    pub async fn poll_until_some<T, E, F, Fut>(&self, mut f: F) -> Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(value) = f(attempt).await? {
                return Ok(Some(value));
            }
            if attempt < attempts {
                let delay = self.backoff_for(attempt);
                tracing::debug!(attempt, max_attempts = attempts, "not ready, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }
}
