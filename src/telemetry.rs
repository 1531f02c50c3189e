//! 日志初始化

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{MqError, Result};

/// 安装全局 `tracing` 订阅者
///
/// 环境变量 `RUST_LOG` 优先于配置中的日志级别。
/// 已经安装过订阅者时返回错误而不是 panic。
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| MqError::Config(format!("invalid log level '{}': {}", config.level, err)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|err| MqError::Internal(format!("failed to install tracing subscriber: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_returns_error() {
        let config = LogConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn invalid_level_is_config_error() {
        let config = LogConfig {
            level: "redis_stream_mq=loud".to_string(),
            json: false,
        };
        // RUST_LOG 存在时会优先使用环境变量
        if std::env::var("RUST_LOG").is_err() {
            let err = init_tracing(&config).unwrap_err();
            assert_eq!(err.code(), crate::error::ErrorCode::ConfigurationError);
        }
    }
}
