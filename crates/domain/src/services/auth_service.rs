//! 令牌校验接口

use async_trait::async_trait;

use crate::{AuthError, Principal};

/// 把不透明的凭据解析为调用方身份
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// 校验令牌，失败时返回 [`AuthError::Unauthenticated`]
    async fn validate(&self, token: &str) -> Result<Principal, AuthError>;
}
