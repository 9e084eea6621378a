//! 接收方选择策略
//!
//! hub 只负责扇出机制，哪些连接应当收到一条信封由调用方注入的策略决定。
//! 发起连接本身总是被排除，策略无需处理。

use std::collections::HashSet;
use std::sync::Arc;

use config::PresenceScope;
use domain::UserId;

use crate::connection::ConnectionHandle;

pub trait RecipientPolicy: Send + Sync {
    /// `candidate` 是否应当收到由 `origin` 发起的信封
    fn admits(&self, origin: &ConnectionHandle, candidate: &ConnectionHandle) -> bool;
}

impl<F> RecipientPolicy for F
where
    F: Fn(&ConnectionHandle, &ConnectionHandle) -> bool + Send + Sync,
{
    fn admits(&self, origin: &ConnectionHandle, candidate: &ConnectionHandle) -> bool {
        self(origin, candidate)
    }
}

/// 除发起连接外的所有连接
#[derive(Debug, Clone, Copy, Default)]
pub struct AllOthers;

impl RecipientPolicy for AllOthers {
    fn admits(&self, _origin: &ConnectionHandle, _candidate: &ConnectionHandle) -> bool {
        true
    }
}

/// 只包括其他用户的连接，同一用户的其他设备被排除
#[derive(Debug, Clone, Copy, Default)]
pub struct OtherUsers;

impl RecipientPolicy for OtherUsers {
    fn admits(&self, origin: &ConnectionHandle, candidate: &ConnectionHandle) -> bool {
        origin.user_id() != candidate.user_id()
    }
}

/// 只包括指定用户集合的连接，例如某个聊天的成员
#[derive(Debug, Clone, Default)]
pub struct MembersOf {
    members: HashSet<UserId>,
}

impl MembersOf {
    pub fn new(members: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }
}

impl RecipientPolicy for MembersOf {
    fn admits(&self, _origin: &ConnectionHandle, candidate: &ConnectionHandle) -> bool {
        self.members.contains(&candidate.user_id())
    }
}

/// 根据配置构造在线状态事件的通知范围
pub fn presence_policy(scope: PresenceScope) -> Arc<dyn RecipientPolicy> {
    match scope {
        PresenceScope::OtherUsers => Arc::new(OtherUsers),
        PresenceScope::AllOthers => Arc::new(AllOthers),
    }
}
