use domain::AuthError;
use thiserror::Error;

/// hub 请求错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// 达到连接数上限，拒绝注册
    #[error("connection limit of {limit} reached")]
    ConnectionLimitReached { limit: usize },
    /// 请求队列已满，请求被丢弃
    #[error("hub is overloaded, request shed")]
    Overloaded,
    /// 控制循环已退出
    #[error("hub is not running")]
    Stopped,
}

/// 出站队列写入错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is no longer accepting frames")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("hub error: {0}")]
    Hub(#[from] HubError),
}
