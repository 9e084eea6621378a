//! 用户身份与展示信息

use serde::{Deserialize, Serialize};

use crate::UserId;

/// 通过令牌校验后的调用方身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Principal {
    pub fn new(user_id: UserId, is_admin: bool) -> Self {
        Self { user_id, is_admin }
    }
}

/// 用户展示信息，用于装饰在线状态事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

impl UserProfile {
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
        }
    }
}
