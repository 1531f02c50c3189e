//! 生产者模块

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::stream::StreamClient;

/// 默认 topic 最大长度
pub const DEFAULT_MSG_QUEUE_LEN: usize = 500;

/// 生产者选项
#[derive(Debug, Clone, Default)]
pub struct ProducerOptions {
    /// topic 最大保留消息数，未设置或为 0 时使用默认值
    pub msg_queue_len: Option<usize>,
}

impl ProducerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 topic 最大保留消息数
    pub fn with_msg_queue_len(mut self, len: usize) -> Self {
        self.msg_queue_len = Some(len);
        self
    }

    fn repair(&self) -> usize {
        self.msg_queue_len
            .filter(|len| *len > 0)
            .unwrap_or(DEFAULT_MSG_QUEUE_LEN)
    }
}

/// 生产者
///
/// 只做参数转发，不做重试；消息 ID 由流存储生成。
#[derive(Clone)]
pub struct Producer {
    client: Arc<dyn StreamClient>,
    msg_queue_len: usize,
}

impl Producer {
    pub fn new(client: Arc<dyn StreamClient>, options: ProducerOptions) -> Self {
        Self {
            client,
            msg_queue_len: options.repair(),
        }
    }

    /// 修复后的 topic 最大长度
    pub fn msg_queue_len(&self) -> usize {
        self.msg_queue_len
    }

    /// 生产一条消息，返回消息 ID
    pub async fn send(&self, topic: &str, key: &str, value: &str) -> Result<String> {
        let msg_id = self
            .client
            .enqueue(topic, self.msg_queue_len, key, value)
            .await?;
        debug!(topic = %topic, msg_id = %msg_id, "msg sent");
        Ok(msg_id)
    }

    /// 为 topic 创建消费者组，组已存在时视为成功
    pub async fn create_group(&self, topic: &str, group: &str) -> Result<()> {
        self.client.create_group(topic, group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_len_defaults() {
        assert_eq!(ProducerOptions::new().repair(), DEFAULT_MSG_QUEUE_LEN);
        assert_eq!(
            ProducerOptions::new().with_msg_queue_len(0).repair(),
            DEFAULT_MSG_QUEUE_LEN
        );
        assert_eq!(ProducerOptions::new().with_msg_queue_len(20).repair(), 20);
    }
}
