//! Redis Stream MQ
//!
//! 基于 Redis Streams 消费者组实现的消息队列：至少一次投递、有界重试、毒消息转入死信。
//!
//! - [`producer`]：发布消息
//! - [`consumer`]：消费循环（认领新消息、处理、死信投递、认领 pending 消息）
//! - [`dead_letter`]：死信投递实现
//! - [`stream`]：流存储客户端（Redis 实现与进程内实现）

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod producer;
pub mod stream;
pub mod telemetry;

// Re-exports
pub use config::{ConsumerSettings, LogConfig, MqConfig, ProducerSettings, RedisSettings};
pub use consumer::{
    Consumer, ConsumerHandle, ConsumerIdentity, ConsumerOptions, DeliveryContext,
    DeliveryObserver, MessageHandler, TracingObserver, handler_fn,
};
pub use dead_letter::{DeadLetterLogger, DeadLetterMailbox, StreamDeadLetter};
pub use error::{ErrorCategory, ErrorCode, MqError, Result};
pub use producer::{Producer, ProducerOptions};
pub use stream::{
    ClientOptions, InMemoryStream, Message, PendingBatch, RedisStreamClient, StreamClient,
};
pub use telemetry::init_tracing;
