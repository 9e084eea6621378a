//! 领域模型错误定义
//!
//! 认证、用户目录以及信封编解码的错误类型。

use thiserror::Error;

use crate::UserId;

/// 认证错误，只影响本次升级请求
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// 令牌无效或已过期
    #[error("unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    /// 令牌有效但无法解析对应用户
    #[error("user lookup failed for {user_id}")]
    UserLookupFailed { user_id: UserId },
}

impl AuthError {
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }
}

/// 用户目录查询错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user {0} not found")]
    NotFound(UserId),

    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 信封解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 字节不是合法的带标签 JSON 结构
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// 结构合法，但标签不是已知的事件类型
    #[error("unknown envelope type: {0}")]
    UnknownTag(String),
}
