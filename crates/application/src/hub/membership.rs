//! 成员关系：连接ID → 连接，以及用户 → 连接ID集合
//!
//! 两个结构只通过 [`Membership::insert`] / [`Membership::remove`] 一起修改，
//! 并且只由 hub 控制循环持有。

use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, UserId};

use crate::connection::ConnectionHandle;

#[derive(Debug, Default)]
pub struct Membership {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// 移除的结果
#[derive(Debug)]
pub struct Departure {
    pub connection: ConnectionHandle,
    /// 该用户是否已没有任何连接
    pub last_for_user: bool,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入连接，返回该用户是否是第一次上线。重复的连接ID不会改变任何结构。
    pub fn insert(&mut self, connection: ConnectionHandle) -> bool {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            return false;
        }
        let user_id = connection.user_id();
        self.connections.insert(id, connection);

        let devices = self.by_user.entry(user_id).or_default();
        devices.insert(id);
        devices.len() == 1
    }

    /// 移除连接；不存在时返回 `None`
    pub fn remove(&mut self, id: ConnectionId) -> Option<Departure> {
        let connection = self.connections.remove(&id)?;
        let user_id = connection.user_id();

        let last_for_user = match self.by_user.get_mut(&user_id) {
            Some(devices) => {
                devices.remove(&id);
                if devices.is_empty() {
                    self.by_user.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        Some(Departure {
            connection,
            last_for_user,
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.by_user.contains_key(&user_id)
    }

    pub fn connections_of(&self, user_id: UserId) -> usize {
        self.by_user.get(&user_id).map_or(0, HashSet::len)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.by_user.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.connections.values()
    }

    /// 清空并返回所有连接
    pub fn drain(&mut self) -> Vec<ConnectionHandle> {
        self.by_user.clear();
        self.connections.drain().map(|(_, connection)| connection).collect()
    }

    /// 两个结构互相一致：索引中的每个ID都在主表中且属于该用户，主表中的每个连接都在索引中
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.by_user.values().map(HashSet::len).sum();
        if indexed != self.connections.len() {
            return false;
        }

        let index_ok = self.by_user.iter().all(|(user_id, devices)| {
            !devices.is_empty()
                && devices.iter().all(|id| {
                    self.connections
                        .get(id)
                        .is_some_and(|connection| connection.user_id() == *user_id)
                })
        });

        let primary_ok = self.connections.iter().all(|(id, connection)| {
            self.by_user
                .get(&connection.user_id())
                .is_some_and(|devices| devices.contains(id))
        });

        index_ok && primary_ok
    }
}
