//! 消息队列统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 消息队列统一错误类型
#[derive(Error, Debug, Clone)]
pub enum MqError {
    /// 参数错误（缺少 topic / group / consumer_id 等必填项）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 配置文件读取或解析失败
    #[error("configuration error: {0}")]
    Config(String),

    /// 没有可消费的消息，属于预期结果而非故障
    #[error("no message received")]
    NoMessage,

    /// 传输层错误（连接失败、命令执行失败等）
    #[error("transport error [{code}] {reason}", code = .code.as_str())]
    Transport { code: ErrorCode, reason: String },

    /// 服务端返回了无法解析的应答
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// 操作超时
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// 消费者已被取消
    #[error("operation cancelled")]
    Cancelled,

    /// 用户回调执行失败
    #[error("message handler failed: {0}")]
    Handler(String),

    /// 死信投递失败
    #[error("dead letter delivery failed: {0}")]
    DeadLetter(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(String),

    /// 内部错误（后台任务异常退出等）
    #[error("internal error: {0}")]
    Internal(String),
}

impl MqError {
    /// 创建参数错误
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MqError::InvalidArgument(msg.into())
    }

    /// 创建传输层错误
    pub fn transport(code: ErrorCode, reason: impl Into<String>) -> Self {
        MqError::Transport {
            code,
            reason: reason.into(),
        }
    }

    /// 创建应答格式错误
    pub fn invalid_reply(msg: impl Into<String>) -> Self {
        MqError::InvalidReply(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(msg: impl Into<String>) -> Self {
        MqError::Timeout(msg.into())
    }

    /// 创建死信投递错误
    pub fn dead_letter(msg: impl Into<String>) -> Self {
        MqError::DeadLetter(msg.into())
    }

    /// 是否为 "没有消息" 的预期结果
    pub fn is_no_message(&self) -> bool {
        matches!(self, MqError::NoMessage)
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            MqError::InvalidArgument(_) => ErrorCode::InvalidParameter,
            MqError::Config(_) => ErrorCode::ConfigurationError,
            MqError::NoMessage => ErrorCode::NoMessage,
            MqError::Transport { code, .. } => *code,
            MqError::InvalidReply(_) => ErrorCode::InvalidReply,
            MqError::Timeout(_) => ErrorCode::OperationTimeout,
            MqError::Cancelled => ErrorCode::OperationCancelled,
            MqError::Handler(_) => ErrorCode::MessageHandleFailed,
            MqError::DeadLetter(_) => ErrorCode::DeadLetterDeliveryFailed,
            MqError::Io(_) => ErrorCode::IoError,
            MqError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, MqError>;
