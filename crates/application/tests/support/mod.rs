#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use application::{ConnectionHandle, Frame, Gateway, Hub};
use config::HubConfig;
use domain::{
    AuthError, ConnectionId, DirectoryError, Envelope, EventKind, MockTokenValidator,
    MockUserDirectory, Principal, UserId, UserProfile,
};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub fn test_config() -> HubConfig {
    HubConfig {
        outbound_capacity: 16,
        ..HubConfig::default()
    }
}

/// 令牌就是用户ID的字符串形式
pub fn uuid_validator() -> MockTokenValidator {
    let mut validator = MockTokenValidator::new();
    validator.expect_validate().returning(|token| {
        Uuid::parse_str(token)
            .map(|id| Principal::new(UserId::from(id), false))
            .map_err(|_| AuthError::unauthenticated("invalid token"))
    });
    validator
}

pub fn profile_for(user_id: UserId) -> UserProfile {
    let short = &user_id.to_string()[..8];
    UserProfile::new(
        format!("user-{short}"),
        format!("User {short}"),
        String::new(),
    )
}

pub fn static_directory() -> MockUserDirectory {
    let mut directory = MockUserDirectory::new();
    directory
        .expect_lookup()
        .returning(|user_id| Ok(profile_for(user_id)));
    directory
}

pub fn failing_directory() -> MockUserDirectory {
    let mut directory = MockUserDirectory::new();
    directory
        .expect_lookup()
        .returning(|_| Err(DirectoryError::unavailable("database is down")));
    directory
}

pub struct TestHub {
    pub hub: Hub,
    pub gateway: Gateway,
    task: JoinHandle<()>,
}

impl TestHub {
    pub fn start(config: HubConfig) -> Self {
        Self::with_directory(config, static_directory())
    }

    pub fn with_directory(config: HubConfig, directory: MockUserDirectory) -> Self {
        let (hub, task) = Hub::spawn(&config);
        let gateway = Gateway::new(
            hub.clone(),
            Arc::new(uuid_validator()),
            Arc::new(directory),
            &config,
        );
        Self { hub, gateway, task }
    }

    pub async fn connect(&self) -> TestClient {
        self.connect_as(UserId::from(Uuid::new_v4())).await
    }

    pub async fn connect_as(&self, user_id: UserId) -> TestClient {
        let connection = self
            .gateway
            .establish(&user_id.to_string())
            .await
            .expect("connection admitted");
        TestClient::attach(user_id, connection)
    }
}

/// 模拟对端：向连接写入帧，读取连接写出的帧
pub struct TestClient {
    pub user_id: UserId,
    pub handle: ConnectionHandle,
    inbound: UnboundedSender<Result<Frame, String>>,
    outbound: UnboundedReceiver<Frame>,
    pub task: JoinHandle<()>,
}

impl TestClient {
    pub fn attach(user_id: UserId, connection: application::Connection) -> Self {
        let (inbound, stream) = unbounded();
        let (sink, outbound) = unbounded();
        let handle = connection.handle().clone();
        let task = tokio::spawn(connection.run(stream, sink));
        Self {
            user_id,
            handle,
            inbound,
            outbound,
            task,
        }
    }

    /// 对端不再读取：之后的任何写入都会失败
    pub fn attach_unreadable(user_id: UserId, connection: application::Connection) -> Self {
        let mut client = Self::attach(user_id, connection);
        client.outbound.close();
        client
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn send(&self, frame: Frame) {
        let _ = self.inbound.unbounded_send(Ok(frame));
    }

    pub fn send_text(&self, text: &str) {
        self.send(Frame::Text(Arc::from(text)));
    }

    pub fn fail_read(&self, error: &str) {
        let _ = self.inbound.unbounded_send(Err(error.to_string()));
    }

    /// 下一帧，超时返回 `None`
    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(1), self.outbound.next())
            .await
            .ok()
            .flatten()
    }

    /// 跳过心跳，返回下一个信封
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.next_frame().await? {
                Frame::Text(text) => return Envelope::decode(text.as_bytes()).ok(),
                Frame::Ping | Frame::Pong => continue,
                Frame::Binary(_) | Frame::Close => return None,
            }
        }
    }

    pub async fn expect_envelope(&mut self, kind: EventKind) -> Envelope {
        let envelope = self.next_envelope().await.expect("envelope received");
        assert_eq!(envelope.kind(), kind, "unexpected envelope {envelope:?}");
        envelope
    }

    /// 已经写出、尚未读取的帧
    pub fn pending_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.outbound.try_next() {
            frames.push(frame);
        }
        frames
    }

    /// 对端断开
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }

    pub async fn closed(self) {
        self.task.await.expect("connection task completed");
    }
}

/// 让已经就绪的任务都跑一轮
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn message(text: &str) -> String {
    format!(r#"{{"type":"message","payload":{{"text":"{text}"}}}}"#)
}
