//! 消费者选项
//!
//! 所有选项都是可选的，构造时逐个字段修复为默认值，修复后不可变。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::observer::{DeliveryObserver, TracingObserver};
use crate::dead_letter::{DeadLetterLogger, DeadLetterMailbox};

/// 默认每轮接收新消息的阻塞时长
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);
/// 默认最大重试次数
pub const DEFAULT_MAX_RETRY_LIMIT: u32 = 3;
/// 默认死信投递超时
pub const DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT: Duration = Duration::from_secs(1);
/// 默认回调执行超时
pub const DEFAULT_HANDLE_MSG_TIMEOUT: Duration = Duration::from_secs(1);

/// 消费者选项
#[derive(Clone, Default)]
pub struct ConsumerOptions {
    /// 每轮接收新消息的阻塞时长，为零时一直阻塞到有消息为止
    pub receive_timeout: Option<Duration>,
    /// 最大重试次数，失败次数达到该值后消息被投递到死信
    pub max_retry_limit: Option<u32>,
    /// 死信投递实现
    pub dead_letter_mailbox: Option<Arc<dyn DeadLetterMailbox>>,
    /// 死信投递超时，为零时使用默认值
    pub dead_letter_deliver_timeout: Option<Duration>,
    /// 回调执行超时，为零时使用默认值
    pub handle_msg_timeout: Option<Duration>,
    /// 事件观察者
    pub observer: Option<Arc<dyn DeliveryObserver>>,
    /// 读取失败后下一轮前的等待时长，默认不等待
    pub error_backoff: Option<Duration>,
}

impl ConsumerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置接收新消息的阻塞时长
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// 设置最大重试次数
    pub fn with_max_retry_limit(mut self, limit: u32) -> Self {
        self.max_retry_limit = Some(limit);
        self
    }

    /// 设置死信投递实现
    pub fn with_dead_letter_mailbox(mut self, mailbox: Arc<dyn DeadLetterMailbox>) -> Self {
        self.dead_letter_mailbox = Some(mailbox);
        self
    }

    /// 设置死信投递超时
    pub fn with_dead_letter_deliver_timeout(mut self, timeout: Duration) -> Self {
        self.dead_letter_deliver_timeout = Some(timeout);
        self
    }

    /// 设置回调执行超时
    pub fn with_handle_msg_timeout(mut self, timeout: Duration) -> Self {
        self.handle_msg_timeout = Some(timeout);
        self
    }

    /// 设置事件观察者
    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// 设置读取失败后的等待时长
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = Some(backoff);
        self
    }

    /// 逐个字段修复为默认值
    pub fn repair(self) -> EffectiveOptions {
        EffectiveOptions {
            receive_timeout: self.receive_timeout.unwrap_or(DEFAULT_RECEIVE_TIMEOUT),
            max_retry_limit: self.max_retry_limit.unwrap_or(DEFAULT_MAX_RETRY_LIMIT),
            dead_letter_mailbox: self
                .dead_letter_mailbox
                .unwrap_or_else(|| Arc::new(DeadLetterLogger::new())),
            dead_letter_deliver_timeout: self
                .dead_letter_deliver_timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT),
            handle_msg_timeout: self
                .handle_msg_timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_HANDLE_MSG_TIMEOUT),
            observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
            error_backoff: self.error_backoff.unwrap_or(Duration::ZERO),
        }
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("receive_timeout", &self.receive_timeout)
            .field("max_retry_limit", &self.max_retry_limit)
            .field("dead_letter_mailbox", &self.dead_letter_mailbox.is_some())
            .field("dead_letter_deliver_timeout", &self.dead_letter_deliver_timeout)
            .field("handle_msg_timeout", &self.handle_msg_timeout)
            .field("observer", &self.observer.is_some())
            .field("error_backoff", &self.error_backoff)
            .finish()
    }
}

/// 修复后的消费者选项
#[derive(Clone)]
pub struct EffectiveOptions {
    pub receive_timeout: Duration,
    pub max_retry_limit: u32,
    pub dead_letter_mailbox: Arc<dyn DeadLetterMailbox>,
    pub dead_letter_deliver_timeout: Duration,
    pub handle_msg_timeout: Duration,
    pub observer: Arc<dyn DeliveryObserver>,
    pub error_backoff: Duration,
}

impl fmt::Debug for EffectiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveOptions")
            .field("receive_timeout", &self.receive_timeout)
            .field("max_retry_limit", &self.max_retry_limit)
            .field("dead_letter_deliver_timeout", &self.dead_letter_deliver_timeout)
            .field("handle_msg_timeout", &self.handle_msg_timeout)
            .field("error_backoff", &self.error_backoff)
            .finish_non_exhaustive()
    }
}
