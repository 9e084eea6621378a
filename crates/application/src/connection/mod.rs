//! 单个存活连接
//!
//! [`ConnectionHandle`] 是 hub 持有的非独占引用：身份信息、生命周期状态以及
//! 有界出站队列的发送端。真正的 socket 由 [`Connection`] 的两个泵任务独占。

mod pump;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use domain::{ConnectionId, Principal, Timestamp, UserId, UserProfile};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::EnqueueError;

pub use pump::{Connection, Frame, PumpSettings};

/// 出站队列中的一项：已编码好的信封文本，多个接收方共享同一份
pub type OutboundFrame = Arc<str>;

/// 连接状态机：`Connecting → Active → Draining → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Active => 1,
            ConnectionState::Draining => 2,
            ConnectionState::Closed => 3,
        }
    }
}

/// 进入 Draining 的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 对端发送关闭帧或流结束
    PeerClosed,
    /// 读截止时间内没有任何活动
    ReadTimeout,
    /// socket 读写失败
    Transport,
    /// 协议错误次数超过阈值
    ProtocolViolation,
    /// 出站队列已满
    QueueOverflow,
    /// 被显式注销
    Unregistered,
    /// 服务关闭
    Shutdown,
}

impl CloseReason {
    /// 关闭前是否尽量把队列里已有的帧写出去
    pub fn flushes_queue(self) -> bool {
        matches!(
            self,
            CloseReason::ProtocolViolation | CloseReason::Unregistered | CloseReason::Shutdown
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::ReadTimeout => "read timeout",
            CloseReason::Transport => "transport error",
            CloseReason::ProtocolViolation => "protocol violation",
            CloseReason::QueueOverflow => "outbound queue overflow",
            CloseReason::Unregistered => "unregistered",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

struct Lifecycle {
    state: AtomicU8,
    reason: OnceLock<CloseReason>,
    closing: CancellationToken,
}

/// hub 对连接的引用
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    principal: Principal,
    profile: Arc<UserProfile>,
    connected_at: Timestamp,
    outbound: mpsc::Sender<OutboundFrame>,
    lifecycle: Arc<Lifecycle>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.principal.user_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    /// 创建处于 `Connecting` 状态的连接，返回句柄以及出站队列的接收端
    pub fn new(
        principal: Principal,
        profile: UserProfile,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::generate(),
            principal,
            profile: Arc::new(profile),
            connected_at: Utc::now(),
            outbound,
            lifecycle: Arc::new(Lifecycle {
                state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
                reason: OnceLock::new(),
                closing: CancellationToken::new(),
            }),
        };
        (handle, queue)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.principal.is_admin
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.lifecycle.state.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Active
        )
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lifecycle.reason.get().copied()
    }

    /// 注册成功后进入 `Active`
    pub(crate) fn activate(&self) -> bool {
        self.lifecycle
            .state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 进入 `Draining` 并通知两个泵任务停止。只有第一次调用生效，返回是否由本次触发。
    pub fn begin_draining(&self, reason: CloseReason) -> bool {
        let mut current = self.lifecycle.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current) >= ConnectionState::Draining {
                return false;
            }
            match self.lifecycle.state.compare_exchange(
                current,
                ConnectionState::Draining.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let _ = self.lifecycle.reason.set(reason);
        self.lifecycle.closing.cancel();
        tracing::debug!(
            connection_id = %self.id,
            user_id = %self.principal.user_id,
            %reason,
            "connection draining"
        );
        true
    }

    pub(crate) fn mark_closed(&self) {
        self.lifecycle
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
        // 未经 Draining 直接关闭时也要唤醒等待者
        self.lifecycle.closing.cancel();
    }

    /// 进入 Draining 时完成
    pub fn closing(&self) -> WaitForCancellationFuture<'_> {
        self.lifecycle.closing.cancelled()
    }

    /// 非阻塞写入出站队列。队列满时不扩容，由调用方决定丢弃这个慢连接。
    pub fn try_enqueue(&self, frame: OutboundFrame) -> Result<(), EnqueueError> {
        if !self.is_alive() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        ConnectionHandle::new(
            Principal::new(UserId::from(Uuid::new_v4()), false),
            UserProfile::new("alice", "Alice", ""),
            capacity,
        )
    }

    #[test]
    fn test_lifecycle_moves_forward_only() {
        let (handle, _queue) = handle(4);
        assert_eq!(handle.state(), ConnectionState::Connecting);

        assert!(handle.activate());
        assert_eq!(handle.state(), ConnectionState::Active);
        assert!(!handle.activate());

        assert!(handle.begin_draining(CloseReason::ReadTimeout));
        assert!(!handle.begin_draining(CloseReason::Transport));
        assert_eq!(handle.state(), ConnectionState::Draining);
        assert_eq!(handle.close_reason(), Some(CloseReason::ReadTimeout));

        handle.mark_closed();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(!handle.activate());
    }

    #[test]
    fn test_connected_at_is_fixed_at_creation() {
        let before = Utc::now();
        let (handle, _queue) = handle(1);
        let clone = handle.clone();

        assert!(handle.connected_at() >= before);
        assert!(handle.connected_at() <= Utc::now());
        assert_eq!(clone.connected_at(), handle.connected_at());
    }

    #[test]
    fn test_full_queue_is_reported_without_blocking() {
        let (handle, mut queue) = handle(2);
        handle.activate();

        assert!(handle.try_enqueue(Arc::from("a")).is_ok());
        assert!(handle.try_enqueue(Arc::from("b")).is_ok());
        assert_eq!(handle.try_enqueue(Arc::from("c")), Err(EnqueueError::Full));

        assert_eq!(queue.try_recv().unwrap().as_ref(), "a");
        assert!(handle.try_enqueue(Arc::from("c")).is_ok());
    }

    #[test]
    fn test_draining_connection_rejects_new_frames() {
        let (handle, _queue) = handle(2);
        handle.activate();
        handle.begin_draining(CloseReason::Unregistered);
        assert_eq!(handle.try_enqueue(Arc::from("a")), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_closing_future_resolves_on_drain() {
        let (handle, _queue) = handle(1);
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.closing().await });
        handle.begin_draining(CloseReason::Shutdown);
        task.await.unwrap();
    }
}
