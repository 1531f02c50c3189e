//! Stream 客户端模块
//!
//! 定义消费循环依赖的流存储原语（追加、建组、认领新消息、认领 pending 消息、确认），
//! 并提供两种实现：
//! - [`RedisStreamClient`]：基于 Redis Streams 的实现
//! - [`InMemoryStream`]：进程内实现，具备消费者组语义，用于测试和无 Redis 场景

pub mod memory;
pub mod redis_client;

pub use self::memory::InMemoryStream;
pub use self::redis_client::{ClientOptions, RedisStreamClient};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MqError, Result};

/// 流中的一条消息
///
/// 由流存储在发布时创建，对消费者只读。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    /// 流存储分配的单调递增 ID
    pub id: String,
    pub key: String,
    pub value: String,
}

impl Message {
    pub fn new(id: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 一次 pending 读取的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    /// 可以重新投递的消息
    pub messages: Vec<Message>,
    /// 仍在 pending 中但消息体已被裁剪的 ID，只能确认不能再投递
    pub trimmed: Vec<String>,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.trimmed.is_empty()
    }
}

/// 流存储客户端 trait
///
/// 所有操作都是针对共享有序日志的原子远程操作，实现必须可以被多个消费者并发使用。
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// 追加一条消息，并将 topic 裁剪到最多 `max_len` 条，返回服务端生成的消息 ID
    async fn enqueue(&self, topic: &str, max_len: usize, key: &str, value: &str) -> Result<String>;

    /// 创建从流起点开始的消费者组，组已存在时视为成功
    async fn create_group(&self, topic: &str, group: &str) -> Result<()>;

    /// 认领组内尚未投递过的新消息，最多阻塞 `block`
    ///
    /// `block` 为零时一直阻塞到有消息为止。没有消息时返回 [`MqError::NoMessage`]。
    async fn claim_new(
        &self,
        group: &str,
        consumer_id: &str,
        topic: &str,
        block: Duration,
    ) -> Result<Vec<Message>>;

    /// 非阻塞地读取已被该消费者认领但尚未确认的消息
    ///
    /// 每次从该消费者 pending 集合的起点全量扫描，消息体已被裁剪的条目只返回 ID。
    /// 两者都为空时返回 [`MqError::NoMessage`]。
    async fn claim_pending(&self, group: &str, consumer_id: &str, topic: &str)
    -> Result<PendingBatch>;

    /// 确认一条消息，确认数量不为 1 时返回错误
    async fn acknowledge(&self, topic: &str, group: &str, msg_id: &str) -> Result<()>;
}

/// 校验必填参数非空
pub(crate) fn ensure_not_empty(command: &str, fields: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MqError::invalid_argument(format!(
            "{} {} can't be empty",
            command,
            missing.join(" | ")
        )))
    }
}
