//! 错误处理模块
//!
//! 提供统一的错误类型和错误代码分类。
//! "没有消息" 作为独立的变体存在，消费循环据此区分空轮询与传输故障。

pub mod code;
pub mod conversions;
pub mod mq_error;

pub use code::{ErrorCategory, ErrorCode};
pub use mq_error::{MqError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_message_is_distinguishable() {
        let err = MqError::NoMessage;
        assert!(err.is_no_message());
        assert_eq!(err.code(), ErrorCode::NoMessage);
        assert_eq!(err.code().category(), ErrorCategory::Message);
        assert!(!MqError::invalid_reply("bad").is_no_message());
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = MqError::transport(ErrorCode::ConnectionFailed, "refused");
        assert!(err.is_retryable());
        assert_eq!(err.code().category(), ErrorCategory::Transport);
        assert!(err.to_string().contains("CONNECTION_FAILED"));

        assert!(!MqError::invalid_argument("topic").is_retryable());
        assert!(MqError::timeout("deadline").is_retryable());
    }

    #[test]
    fn io_error_converts() {
        let err: MqError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.code(), ErrorCode::IoError);
    }
}
