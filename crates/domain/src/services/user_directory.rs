//! 用户目录接口

use async_trait::async_trait;

use crate::{DirectoryError, UserId, UserProfile};

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 查询用户展示信息
    async fn lookup(&self, user_id: UserId) -> Result<UserProfile, DirectoryError>;
}
