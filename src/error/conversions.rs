//! 错误类型转换实现

use super::{ErrorCode, MqError};
use std::io;

impl From<io::Error> for MqError {
    fn from(err: io::Error) -> Self {
        MqError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MqError {
    fn from(err: toml::de::Error) -> Self {
        MqError::Config(format!("TOML 解析错误: {}", err))
    }
}

impl From<redis::RedisError> for MqError {
    fn from(err: redis::RedisError) -> Self {
        // 根据 Redis 错误类型映射到传输层错误代码
        let code = if err.is_timeout() {
            ErrorCode::ConnectionTimeout
        } else if err.is_connection_dropped() {
            ErrorCode::ConnectionClosed
        } else if err.is_connection_refusal() || err.is_io_error() {
            ErrorCode::ConnectionFailed
        } else {
            ErrorCode::CommandFailed
        };

        MqError::transport(code, err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for MqError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MqError::timeout(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MqError {
    fn from(err: tokio::task::JoinError) -> Self {
        MqError::Internal(format!("consumer task failed: {}", err))
    }
}
