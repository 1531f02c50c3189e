//! 死信模块
//!
//! 当消息处理失败次数达到上限时，消息会被投递到 [`DeadLetterMailbox`]，随后无论投递成功与否都会被确认。
//! 死信投递本身没有重试，需要重试或退避的场景由自定义实现负责。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::consumer::DeliveryContext;
use crate::error::{MqError, Result};
use crate::stream::{Message, StreamClient};

/// 默认死信 topic 最大长度
pub const DEFAULT_DEAD_LETTER_MAX_LEN: usize = 10_000;

/// 死信投递 trait
#[async_trait]
pub trait DeadLetterMailbox: Send + Sync {
    async fn deliver(&self, ctx: &DeliveryContext, msg: &Message) -> Result<()>;
}

/// 默认死信实现，仅打印日志
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadLetterLogger;

impl DeadLetterLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeadLetterMailbox for DeadLetterLogger {
    async fn deliver(&self, _ctx: &DeliveryContext, msg: &Message) -> Result<()> {
        error!(
            msg_id = %msg.id,
            msg_key = %msg.key,
            "msg fail exceeded retry limit"
        );
        Ok(())
    }
}

/// 将死信写入另一个 topic
///
/// 死信的 key/value 与原消息一致，便于后续人工或程序化重放。
pub struct StreamDeadLetter {
    client: Arc<dyn StreamClient>,
    topic: String,
    max_len: usize,
}

impl StreamDeadLetter {
    /// 创建死信 topic 投递器
    ///
    /// # 参数
    /// * `client` - 流客户端，可以与消费者共用
    /// * `topic` - 死信 topic，不能为空
    pub fn new(client: Arc<dyn StreamClient>, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(MqError::invalid_argument("dead letter topic can't be empty"));
        }

        Ok(Self {
            client,
            topic,
            max_len: DEFAULT_DEAD_LETTER_MAX_LEN,
        })
    }

    /// 设置死信 topic 最大长度，0 表示使用默认值
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = if max_len == 0 {
            DEFAULT_DEAD_LETTER_MAX_LEN
        } else {
            max_len
        };
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl DeadLetterMailbox for StreamDeadLetter {
    async fn deliver(&self, ctx: &DeliveryContext, msg: &Message) -> Result<()> {
        let dead_id = ctx
            .run(self.client.enqueue(&self.topic, self.max_len, &msg.key, &msg.value))
            .await
            .map_err(|err| {
                MqError::dead_letter(format!(
                    "msg id: {}, dead letter topic: {}, err: {}",
                    msg.id, self.topic, err
                ))
            })?;

        tracing::debug!(
            msg_id = %msg.id,
            dead_letter_topic = %self.topic,
            dead_letter_id = %dead_id,
            "msg forwarded to dead letter topic"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::stream::InMemoryStream;

    #[tokio::test]
    async fn logger_always_succeeds() {
        let ctx = DeliveryContext::with_timeout(Duration::from_secs(1));
        let result = DeadLetterLogger::new()
            .deliver(&ctx, &Message::new("1-0", "k", "v"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stream_dead_letter_forwards_payload() {
        let stream = Arc::new(InMemoryStream::new());
        let sink = StreamDeadLetter::new(stream.clone(), "orders.dead").unwrap();
        let ctx = DeliveryContext::with_timeout(Duration::from_secs(1));

        sink.deliver(&ctx, &Message::new("1-0", "k", "v"))
            .await
            .unwrap();

        assert_eq!(stream.len("orders.dead"), 1);
    }

    #[test]
    fn stream_dead_letter_requires_topic() {
        let stream = Arc::new(InMemoryStream::new());
        assert!(StreamDeadLetter::new(stream, "").is_err());
    }
}
