//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 参数与配置错误
/// - 2000-2999: 传输相关错误（Redis 连接、命令执行）
/// - 3000-3999: 消息相关错误
/// - 9000-9999: 系统与通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 参数与配置错误 (1000-1999)
    // ============================================================
    InvalidParameter = 1000,
    ConfigurationError = 1001,

    // ============================================================
    // 传输相关错误 (2000-2999)
    // ============================================================
    ConnectionFailed = 2000,
    ConnectionTimeout = 2001,
    ConnectionClosed = 2002,
    CommandFailed = 2003,
    InvalidReply = 2004,

    // ============================================================
    // 消息相关错误 (3000-3999)
    // ============================================================
    NoMessage = 3000,
    MessageHandleFailed = 3001,
    DeadLetterDeliveryFailed = 3002,

    // ============================================================
    // 系统与通用错误 (9000-9999)
    // ============================================================
    IoError = 9000,
    OperationTimeout = 9001,
    OperationCancelled = 9002,
    InternalError = 9003,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::InvalidReply => "INVALID_REPLY",
            ErrorCode::NoMessage => "NO_MESSAGE",
            ErrorCode::MessageHandleFailed => "MESSAGE_HANDLE_FAILED",
            ErrorCode::DeadLetterDeliveryFailed => "DEAD_LETTER_DELIVERY_FAILED",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Argument,
            2000..=2999 => ErrorCategory::Transport,
            3000..=3999 => ErrorCategory::Message,
            _ => ErrorCategory::System,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionClosed
                | ErrorCode::OperationTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Argument,
    Transport,
    Message,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Argument => write!(f, "ARGUMENT"),
            ErrorCategory::Transport => write!(f, "TRANSPORT"),
            ErrorCategory::Message => write!(f, "MESSAGE"),
            ErrorCategory::System => write!(f, "SYSTEM"),
        }
    }
}
