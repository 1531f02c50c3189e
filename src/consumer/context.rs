//! 投递上下文
//!
//! 每次回调或死信投递都会得到一个新的上下文：取消令牌是消费循环令牌的子令牌，
//! 截止时间是一个新的、互不叠加的超时预算。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{MqError, Result};

/// 预算超出 `Instant` 表示范围时使用的截止时间距今时长（约 30 年）
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// 投递上下文
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    token: CancellationToken,
    deadline: Instant,
}

impl DeliveryContext {
    /// 从父令牌派生上下文，父令牌取消时本上下文同时取消
    pub fn new(parent: &CancellationToken, budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            token: parent.child_token(),
            deadline: now
                .checked_add(budget)
                .unwrap_or_else(|| now + FAR_FUTURE),
        }
    }

    /// 创建独立的上下文（不挂在任何消费循环下）
    pub fn with_timeout(budget: Duration) -> Self {
        Self::new(&CancellationToken::new(), budget)
    }

    /// 截止时间
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 剩余时间预算
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// 取消令牌，可用于向下游传播取消
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 已取消或已超时
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// 等待取消或超时
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// 在本上下文的约束下执行 future
    ///
    /// 取消返回 [`MqError::Cancelled`]，超时返回 [`MqError::Timeout`]。
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(MqError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(MqError::timeout("delivery deadline exceeded"))
            }
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_times_out() {
        let ctx = DeliveryContext::with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(MqError::Timeout(_))));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn unbounded_budget_does_not_overflow() {
        let ctx = DeliveryContext::with_timeout(Duration::MAX);
        assert!(!ctx.is_cancelled());
        assert!(ctx.remaining() > Duration::from_secs(86_400));

        let result = ctx.run(async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = DeliveryContext::new(&parent, Duration::from_secs(60));
        assert!(!ctx.is_cancelled());

        parent.cancel();
        let result = ctx.run(std::future::pending::<Result<()>>()).await;
        assert!(matches!(result, Err(MqError::Cancelled)));
    }
}
