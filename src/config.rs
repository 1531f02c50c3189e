//! 配置模块
//!
//! 从 TOML 文件加载 Redis、生产者、消费者和日志配置。
//! 文件中的数值字段沿用 "非法值即未设置" 的约定：
//! - `producer.max_len <= 0` 使用默认值
//! - `consumer.receive_timeout_ms < 0`、`consumer.max_retry_limit < 0` 使用默认值
//! - `consumer.dead_letter_deliver_timeout_ms <= 0`、`consumer.handle_msg_timeout_ms <= 0` 使用默认值

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consumer::ConsumerOptions;
use crate::error::Result;
use crate::producer::ProducerOptions;
use crate::stream::ClientOptions;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MqConfig {
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub producer: ProducerSettings,
    #[serde(default)]
    pub consumer: ConsumerSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    pub connect_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub connect_retries: Option<u32>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_ms: None,
            response_timeout_ms: None,
            connect_retries: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProducerSettings {
    pub max_len: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConsumerSettings {
    pub receive_timeout_ms: Option<i64>,
    pub max_retry_limit: Option<i64>,
    pub dead_letter_deliver_timeout_ms: Option<i64>,
    pub handle_msg_timeout_ms: Option<i64>,
    pub error_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl MqConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MqConfig = toml::from_str(content)?;
        Ok(config)
    }
}

impl From<&RedisSettings> for ClientOptions {
    fn from(settings: &RedisSettings) -> Self {
        ClientOptions {
            connect_timeout: settings.connect_timeout_ms.map(Duration::from_millis),
            response_timeout: settings.response_timeout_ms.map(Duration::from_millis),
            connect_retries: settings.connect_retries,
        }
    }
}

impl From<&ProducerSettings> for ProducerOptions {
    fn from(settings: &ProducerSettings) -> Self {
        ProducerOptions {
            msg_queue_len: settings
                .max_len
                .filter(|len| *len > 0)
                .and_then(|len| usize::try_from(len).ok()),
        }
    }
}

/// 非负毫秒数转换为时长
fn non_negative_ms(value: Option<i64>) -> Option<Duration> {
    value
        .and_then(|ms| u64::try_from(ms).ok())
        .map(Duration::from_millis)
}

/// 正毫秒数转换为时长
fn positive_ms(value: Option<i64>) -> Option<Duration> {
    value.filter(|ms| *ms > 0).and_then(|ms| non_negative_ms(Some(ms)))
}

impl From<&ConsumerSettings> for ConsumerOptions {
    /// 死信实现和观察者无法从文件配置，需要在转换后通过 builder 设置
    fn from(settings: &ConsumerSettings) -> Self {
        ConsumerOptions {
            receive_timeout: non_negative_ms(settings.receive_timeout_ms),
            max_retry_limit: settings
                .max_retry_limit
                .and_then(|limit| u32::try_from(limit).ok()),
            dead_letter_mailbox: None,
            dead_letter_deliver_timeout: positive_ms(settings.dead_letter_deliver_timeout_ms),
            handle_msg_timeout: positive_ms(settings.handle_msg_timeout_ms),
            observer: None,
            error_backoff: settings.error_backoff_ms.map(Duration::from_millis),
        }
    }
}
