//! 设备通信错误
//!
//! 设备的嵌入式 HTTP 服务器会把同一个状态码用于不相关的情况
//! （例如 404 既可能是文件不存在，也可能是设备正忙），
//! 因此这里只做分类，具体含义由上层根据上下文解释。

use std::fmt;

/// 失败发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 等待响应头
    Headers,
    /// 读取响应体
    Body,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Headers => write!(f, "headers"),
            Phase::Body => write!(f, "body"),
        }
    }
}

/// 无法建立通信的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnableCause {
    /// 设备返回的状态码 (400/401/500/503)
    Status(u16),
    /// 建立连接失败
    Connect,
    /// 阶段超时
    Timeout(Phase),
    /// 其他请求错误
    Request,
}

impl fmt::Display for UnableCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnableCause::Status(code) => write!(f, "HTTP {code}"),
            UnableCause::Connect => write!(f, "connect failed"),
            UnableCause::Timeout(phase) => write!(f, "no response ({phase})"),
            UnableCause::Request => write!(f, "request failed"),
        }
    }
}

/// 设备通信错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// 请求前或请求中无法与设备通信，引擎内部会重试
    #[error("unable to connect to card ({cause})")]
    ConnectionUnable { cause: UnableCause },

    /// 传输过程中链路断开
    #[error("connection to card lost")]
    ConnectionLost,

    /// 设备返回 404（不一定表示文件不存在）
    #[error("file not found on card: {path}")]
    FileNotFound { path: String },

    /// 长度不符、读取不完整或超出
    #[error("invalid file data: {reason}")]
    FileInvalid { reason: String },

    #[error("failed to delete file on card: {path}")]
    FileDeletionFailed { path: String },

    #[error("card has been changed")]
    CardChanged,

    #[error("upload is disabled on card")]
    CardUploadDisabled,

    /// 调用方取消
    #[error("operation cancelled")]
    Cancelled,

    /// 阶段超时（响应体阶段，不重试）
    #[error("timed out waiting for {phase}")]
    Timeout { phase: Phase },

    /// 尚未分类的情况
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl RemoteError {
    /// 只有无法连接的错误会在引擎内部重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::ConnectionUnable { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Cancelled)
    }

    /// 面向用户的状态文本
    pub fn status_text(&self) -> &'static str {
        match self {
            RemoteError::ConnectionUnable { .. } => "无法连接到卡片",
            RemoteError::ConnectionLost => "与卡片的连接已断开",
            RemoteError::FileNotFound { .. } => "卡片上找不到该文件",
            RemoteError::FileInvalid { .. } => "从卡片读取的文件数据无效",
            RemoteError::FileDeletionFailed { .. } => "删除卡片上的文件失败",
            RemoteError::CardChanged => "卡片已被更换",
            RemoteError::CardUploadDisabled => "卡片未启用上传功能",
            RemoteError::Cancelled => "已取消",
            RemoteError::Timeout { .. } => "卡片无响应",
            RemoteError::Unexpected(_) => "发生意外错误",
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
