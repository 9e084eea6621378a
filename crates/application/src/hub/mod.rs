//! 连接注册中心
//!
//! 成员关系只由一个控制循环持有和修改。外部通过 [`Hub`] 句柄把请求放进有界命令队列，
//! 控制循环逐个处理：注册、注销、广播以及只读查询。扇出时写入每个接收方的出站队列
//! 从不阻塞，队列已满的接收方被注销，其余接收方照常收到。

mod membership;
mod policy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use config::HubConfig;
use domain::{ConnectionId, Envelope, UserId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{CloseReason, ConnectionHandle, OutboundFrame};
use crate::error::{EnqueueError, HubError};

pub use membership::{Departure, Membership};
pub use policy::{presence_policy, AllOthers, MembersOf, OtherUsers, RecipientPolicy};

/// hub 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
    pub registered_total: u64,
    pub rejected_total: u64,
    pub evicted_total: u64,
    pub stale_broadcasts: u64,
    pub delivered_total: u64,
    /// 因命令队列已满被丢弃的注册/广播请求
    pub shed_requests: u64,
}

enum Command {
    Register {
        connection: ConnectionHandle,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: ConnectionId,
        done: Option<oneshot::Sender<()>>,
    },
    Broadcast {
        origin: ConnectionId,
        envelope: Envelope,
        audience: Arc<dyn RecipientPolicy>,
    },
    Query(Query),
    Shutdown,
}

enum Query {
    OnlineUsers(oneshot::Sender<Vec<UserId>>),
    IsOnline(UserId, oneshot::Sender<bool>),
    Connected(ConnectionId, oneshot::Sender<bool>),
    Stats(oneshot::Sender<HubStats>),
}

/// 控制循环的句柄，可廉价克隆
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    shed: Arc<AtomicU64>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Hub {
    /// 创建句柄和尚未运行的控制循环
    pub fn new(config: &HubConfig) -> (Hub, HubLoop) {
        let (commands, inbox) = mpsc::channel(config.command_capacity.max(1));
        let shed = Arc::new(AtomicU64::new(0));
        let hub = Hub {
            commands,
            shed: Arc::clone(&shed),
        };
        let control = HubLoop {
            inbox,
            membership: Membership::new(),
            max_connections: config.max_connections,
            presence: presence_policy(config.presence_scope),
            shed,
            stats: HubStats::default(),
        };
        (hub, control)
    }

    /// 创建并在后台任务中运行控制循环
    pub fn spawn(config: &HubConfig) -> (Hub, JoinHandle<()>) {
        let (hub, control) = Hub::new(config);
        let task = tokio::spawn(control.run());
        (hub, task)
    }

    /// 注册连接，等待控制循环接纳或拒绝
    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), HubError> {
        let (reply, accepted) = oneshot::channel();
        self.submit(Command::Register { connection, reply })?;
        accepted.await.map_err(|_| HubError::Stopped)?
    }

    /// 注销连接；连接不存在或 hub 已停止时什么也不做
    pub async fn unregister(&self, id: ConnectionId) {
        let (done, processed) = oneshot::channel();
        if self
            .commands
            .send(Command::Unregister {
                id,
                done: Some(done),
            })
            .await
            .is_ok()
        {
            let _ = processed.await;
        }
    }

    /// 不等待结果的注销，可在 `Drop` 等同步上下文中调用
    ///
    /// 命令队列已满时改由后台任务排队提交，注销请求不会被丢弃。
    pub fn release(&self, id: ConnectionId) {
        let command = Command::Unregister { id, done: None };
        if let Err(mpsc::error::TrySendError::Full(command)) = self.commands.try_send(command) {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(connection_id = %id, "no runtime to release connection");
                return;
            };
            let commands = self.commands.clone();
            runtime.spawn(async move {
                let _ = commands.send(command).await;
            });
        }
    }

    /// 提交广播请求，不等待扇出完成
    pub fn broadcast(
        &self,
        origin: ConnectionId,
        envelope: Envelope,
        audience: Arc<dyn RecipientPolicy>,
    ) -> Result<(), HubError> {
        self.submit(Command::Broadcast {
            origin,
            envelope,
            audience,
        })
    }

    pub async fn online_users(&self) -> Result<Vec<UserId>, HubError> {
        self.query(Query::OnlineUsers).await
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, HubError> {
        self.query(|reply| Query::IsOnline(user_id, reply)).await
    }

    pub async fn is_connected(&self, id: ConnectionId) -> Result<bool, HubError> {
        self.query(|reply| Query::Connected(id, reply)).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.query(Query::Stats).await
    }

    /// 请求控制循环关闭所有连接并退出
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// 注册和广播不等待队列空位，队列满时直接丢弃
    fn submit(&self, command: Command) -> Result<(), HubError> {
        self.commands.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                self.shed.fetch_add(1, Ordering::Relaxed);
                HubError::Overloaded
            }
            mpsc::error::TrySendError::Closed(_) => HubError::Stopped,
        })
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, HubError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Query(make(reply)))
            .await
            .map_err(|_| HubError::Stopped)?;
        answer.await.map_err(|_| HubError::Stopped)
    }
}

/// 控制循环，独占成员关系
pub struct HubLoop {
    inbox: mpsc::Receiver<Command>,
    membership: Membership,
    max_connections: usize,
    presence: Arc<dyn RecipientPolicy>,
    shed: Arc<AtomicU64>,
    stats: HubStats,
}

impl HubLoop {
    pub async fn run(mut self) {
        tracing::info!(max_connections = self.max_connections, "hub control loop started");

        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Register { connection, reply } => self.register(connection, reply),
                Command::Unregister { id, done } => {
                    self.evict(id, CloseReason::Unregistered);
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
                Command::Broadcast {
                    origin,
                    envelope,
                    audience,
                } => self.broadcast(origin, &envelope, audience.as_ref()),
                Command::Query(query) => self.answer(query),
                Command::Shutdown => break,
            }
        }

        self.shutdown();
    }

    fn register(
        &mut self,
        connection: ConnectionHandle,
        reply: oneshot::Sender<Result<(), HubError>>,
    ) {
        if self.membership.len() >= self.max_connections {
            self.stats.rejected_total += 1;
            tracing::warn!(
                connection_id = %connection.id(),
                user_id = %connection.user_id(),
                limit = self.max_connections,
                "connection limit reached, registration rejected"
            );
            let _ = reply.send(Err(HubError::ConnectionLimitReached {
                limit: self.max_connections,
            }));
            return;
        }

        if !connection.activate() {
            // 注册请求排队期间已被关闭
            let _ = reply.send(Err(HubError::Stopped));
            return;
        }

        let id = connection.id();
        let first_for_user = self.membership.insert(connection.clone());
        self.stats.registered_total += 1;
        tracing::info!(
            connection_id = %id,
            user_id = %connection.user_id(),
            connections = self.membership.len(),
            "connection registered"
        );

        if first_for_user {
            let join = Envelope::user_join(connection.user_id(), connection.profile(), Utc::now());
            let presence = Arc::clone(&self.presence);
            let overflowed = self.fan_out(&connection, &join, presence.as_ref());
            self.evict_all(overflowed);
        }

        if reply.send(Ok(())).is_err() {
            tracing::debug!(connection_id = %id, "registrant went away before admission");
            self.evict(id, CloseReason::Unregistered);
        }
    }

    fn broadcast(&mut self, origin: ConnectionId, envelope: &Envelope, audience: &dyn RecipientPolicy) {
        let Some(sender) = self.membership.get(origin).cloned() else {
            self.stats.stale_broadcasts += 1;
            tracing::debug!(connection_id = %origin, "broadcast from unregistered connection dropped");
            return;
        };

        let overflowed = self.fan_out(&sender, envelope, audience);
        self.evict_all(overflowed);
    }

    /// 编码一次，写入每个被接纳的接收方；返回需要注销的接收方
    fn fan_out(
        &mut self,
        origin: &ConnectionHandle,
        envelope: &Envelope,
        audience: &dyn RecipientPolicy,
    ) -> Vec<(ConnectionId, CloseReason)> {
        let frame: OutboundFrame = Arc::from(envelope.encode());
        let mut failed = Vec::new();
        let mut delivered = 0u64;

        for candidate in self.membership.iter() {
            if candidate.id() == origin.id() || !audience.admits(origin, candidate) {
                continue;
            }
            match candidate.try_enqueue(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    tracing::warn!(
                        connection_id = %candidate.id(),
                        user_id = %candidate.user_id(),
                        "outbound queue full, dropping slow connection"
                    );
                    failed.push((candidate.id(), CloseReason::QueueOverflow));
                }
                Err(EnqueueError::Closed) => {
                    failed.push((candidate.id(), CloseReason::Unregistered));
                }
            }
        }

        self.stats.delivered_total += delivered;
        tracing::trace!(
            kind = envelope.kind().as_str(),
            origin = %origin.id(),
            delivered,
            "fan-out complete"
        );
        failed
    }

    /// 注销可能继续引发注销（离线通知写入时又遇到满队列），用工作列表展开
    fn evict_all(&mut self, mut pending: Vec<(ConnectionId, CloseReason)>) {
        while let Some((id, reason)) = pending.pop() {
            pending.extend(self.remove(id, reason));
        }
    }

    fn evict(&mut self, id: ConnectionId, reason: CloseReason) {
        self.evict_all(vec![(id, reason)]);
    }

    fn remove(&mut self, id: ConnectionId, reason: CloseReason) -> Vec<(ConnectionId, CloseReason)> {
        let Some(Departure {
            connection,
            last_for_user,
        }) = self.membership.remove(id)
        else {
            return Vec::new();
        };

        connection.begin_draining(reason);
        if reason != CloseReason::Unregistered {
            self.stats.evicted_total += 1;
        }
        let connected_for = Utc::now() - connection.connected_at();
        tracing::info!(
            connection_id = %id,
            user_id = %connection.user_id(),
            %reason,
            connected_for_secs = connected_for.num_seconds(),
            connections = self.membership.len(),
            "connection unregistered"
        );

        if !last_for_user {
            return Vec::new();
        }
        let leave = Envelope::user_leave(connection.user_id(), connection.profile(), Utc::now());
        let presence = Arc::clone(&self.presence);
        self.fan_out(&connection, &leave, presence.as_ref())
    }

    fn answer(&self, query: Query) {
        match query {
            Query::OnlineUsers(reply) => {
                let _ = reply.send(self.membership.online_users());
            }
            Query::IsOnline(user_id, reply) => {
                let _ = reply.send(self.membership.is_user_online(user_id));
            }
            Query::Connected(id, reply) => {
                let _ = reply.send(self.membership.contains(id));
            }
            Query::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            connections: self.membership.len(),
            users: self.membership.user_count(),
            shed_requests: self.shed.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }

    fn shutdown(&mut self) {
        let connections = self.membership.drain();
        tracing::info!(connections = connections.len(), "hub shutting down");
        for connection in connections {
            connection.begin_draining(CloseReason::Shutdown);
        }
        self.inbox.close();
        // 关闭后仍在队列中的注册请求随 reply 被丢弃，调用方得到 Stopped
    }
}
