//! 连接的双向泵
//!
//! 入站泵逐帧读取、解码并提交给 hub；出站泵是 socket 唯一的写入者，
//! 在出站队列和心跳定时器之间择先触发者处理。

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use config::HubConfig;
use domain::{ConnectionId, DecodeError, Envelope};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use super::{CloseReason, ConnectionHandle, OutboundFrame};
use crate::error::{EnqueueError, HubError};
use crate::hub::{Hub, RecipientPolicy};

/// 与具体 WebSocket 实现无关的传输帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Arc<str>),
    Binary(Vec<u8>),
    /// 心跳探测
    Ping,
    /// 心跳应答
    Pong,
    Close,
}

/// 泵的时间和阈值参数
#[derive(Debug, Clone)]
pub struct PumpSettings {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_bytes: usize,
    pub max_protocol_errors: u32,
}

impl From<&HubConfig> for PumpSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            write_wait: config.write_wait(),
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            max_message_bytes: config.max_message_bytes,
            max_protocol_errors: config.max_protocol_errors,
        }
    }
}

/// 一个已注册、等待接管 socket 的连接
///
/// 未调用 [`Connection::run`] 就被丢弃时，连接会自动从 hub 注销。
pub struct Connection {
    handle: ConnectionHandle,
    queue: mpsc::Receiver<OutboundFrame>,
    registration: Registration,
    audience: Arc<dyn RecipientPolicy>,
    settings: PumpSettings,
}

/// 持有 hub 中的一条注册；没有显式注销就被丢弃时补发注销
struct Registration {
    hub: Hub,
    id: ConnectionId,
    released: bool,
}

impl Registration {
    async fn release(mut self) {
        self.hub.unregister(self.id).await;
        self.released = true;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(connection_id = %self.id, "connection dropped while registered");
            self.hub.release(self.id);
        }
    }
}

impl Connection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        queue: mpsc::Receiver<OutboundFrame>,
        hub: Hub,
        audience: Arc<dyn RecipientPolicy>,
        settings: PumpSettings,
    ) -> Self {
        let registration = Registration {
            hub,
            id: handle.id(),
            released: false,
        };
        Self {
            handle,
            queue,
            registration,
            audience,
            settings,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// 接管 socket 直到连接关闭
    ///
    /// 出站泵在独立任务中运行，入站泵在当前任务中运行。任一方退出都会让连接进入
    /// Draining，另一方随之退出；最后向 hub 注销并进入 Closed。
    pub async fn run<S, E, Si>(self, stream: S, sink: Si)
    where
        S: Stream<Item = Result<Frame, E>> + Send,
        E: Display + Send,
        Si: Sink<Frame> + Send + 'static,
        Si::Error: Display,
    {
        let Connection {
            handle,
            queue,
            registration,
            audience,
            settings,
        } = self;
        let hub = registration.hub.clone();

        tracing::info!(
            connection_id = %handle.id(),
            user_id = %handle.user_id(),
            "connection pumps started"
        );

        let writer = tokio::spawn(write_pump(
            handle.clone(),
            queue,
            Box::pin(sink),
            settings.clone(),
        ));

        read_pump(&handle, &hub, stream, &audience, &settings).await;

        if let Err(err) = writer.await {
            tracing::error!(connection_id = %handle.id(), error = %err, "write pump panicked");
            handle.begin_draining(CloseReason::Transport);
        }

        registration.release().await;
        handle.mark_closed();

        tracing::info!(
            connection_id = %handle.id(),
            user_id = %handle.user_id(),
            reason = ?handle.close_reason(),
            "connection closed"
        );
    }
}

async fn read_pump<S, E>(
    handle: &ConnectionHandle,
    hub: &Hub,
    stream: S,
    audience: &Arc<dyn RecipientPolicy>,
    settings: &PumpSettings,
) where
    S: Stream<Item = Result<Frame, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut reader = InboundState {
        handle,
        hub,
        audience,
        settings,
        protocol_errors: 0,
    };

    loop {
        // 每次读取都重新计时，任何帧（包括心跳应答）都会刷新截止时间
        let next = tokio::select! {
            biased;
            _ = handle.closing() => return,
            next = timeout(settings.pong_wait, stream.next()) => next,
        };

        let reason = match next {
            Err(_elapsed) => {
                tracing::info!(connection_id = %handle.id(), "no read activity within deadline");
                CloseReason::ReadTimeout
            }
            Ok(None) => CloseReason::PeerClosed,
            Ok(Some(Err(err))) => {
                tracing::warn!(connection_id = %handle.id(), error = %err, "socket read failed");
                CloseReason::Transport
            }
            Ok(Some(Ok(frame))) => match frame {
                Frame::Text(text) => match reader.on_data(text.as_bytes()) {
                    Ok(()) => continue,
                    Err(reason) => reason,
                },
                Frame::Binary(bytes) => match reader.on_data(&bytes) {
                    Ok(()) => continue,
                    Err(reason) => reason,
                },
                Frame::Ping | Frame::Pong => {
                    tracing::trace!(connection_id = %handle.id(), "keepalive frame received");
                    continue;
                }
                Frame::Close => CloseReason::PeerClosed,
            },
        };

        handle.begin_draining(reason);
        return;
    }
}

struct InboundState<'a> {
    handle: &'a ConnectionHandle,
    hub: &'a Hub,
    audience: &'a Arc<dyn RecipientPolicy>,
    settings: &'a PumpSettings,
    protocol_errors: u32,
}

impl InboundState<'_> {
    fn on_data(&mut self, bytes: &[u8]) -> Result<(), CloseReason> {
        if bytes.len() > self.settings.max_message_bytes {
            return self.protocol_error("Message too large");
        }

        let envelope = match Envelope::decode_inbound(bytes) {
            Ok(envelope) => envelope,
            Err(DecodeError::MalformedEnvelope(detail)) => {
                tracing::debug!(connection_id = %self.handle.id(), %detail, "malformed frame");
                return self.protocol_error("Invalid message format");
            }
            Err(DecodeError::UnknownTag(tag)) => {
                tracing::debug!(connection_id = %self.handle.id(), %tag, "unknown message type");
                return self.protocol_error("Unknown message type");
            }
        };

        if !envelope.kind().is_client_event() {
            return self.protocol_error("Message type not accepted from clients");
        }

        let envelope = envelope.from_sender(self.handle.user_id());
        match self
            .hub
            .broadcast(self.handle.id(), envelope, Arc::clone(self.audience))
        {
            Ok(()) => {}
            Err(HubError::Overloaded) => {
                tracing::warn!(connection_id = %self.handle.id(), "hub overloaded, broadcast shed");
            }
            Err(err) => {
                tracing::warn!(connection_id = %self.handle.id(), error = %err, "broadcast not submitted");
            }
        }
        Ok(())
    }

    /// 协议错误回送给发送方，不静默丢弃；超过阈值后关闭连接
    fn protocol_error(&mut self, message: &str) -> Result<(), CloseReason> {
        self.protocol_errors += 1;

        let reply: OutboundFrame = Arc::from(Envelope::error(message, Utc::now()).encode());
        match self.handle.try_enqueue(reply) {
            Ok(()) => {}
            Err(EnqueueError::Full) => return Err(CloseReason::QueueOverflow),
            Err(EnqueueError::Closed) => return Err(CloseReason::Unregistered),
        }

        if self.protocol_errors > self.settings.max_protocol_errors {
            tracing::warn!(
                connection_id = %self.handle.id(),
                errors = self.protocol_errors,
                "too many protocol errors"
            );
            return Err(CloseReason::ProtocolViolation);
        }
        Ok(())
    }
}

async fn write_pump<Si>(
    handle: ConnectionHandle,
    mut queue: mpsc::Receiver<OutboundFrame>,
    mut sink: std::pin::Pin<Box<Si>>,
    settings: PumpSettings,
) where
    Si: Sink<Frame>,
    Si::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = handle.closing() => break,
            item = queue.recv() => match item {
                Some(text) => Frame::Text(text),
                None => {
                    handle.begin_draining(CloseReason::Unregistered);
                    break;
                }
            },
            _ = ticker.tick() => Frame::Ping,
        };

        if let Err(err) = write_frame(&mut sink, frame, settings.write_wait).await {
            tracing::warn!(connection_id = %handle.id(), error = %err, "socket write failed");
            handle.begin_draining(CloseReason::Transport);
            break;
        }
    }

    let reason = handle.close_reason().unwrap_or(CloseReason::Shutdown);
    if reason == CloseReason::Transport {
        return;
    }

    if reason.flushes_queue() {
        while let Ok(text) = queue.try_recv() {
            if write_frame(&mut sink, Frame::Text(text), settings.write_wait)
                .await
                .is_err()
            {
                return;
            }
        }
    } else {
        queue.close();
    }

    let _ = write_frame(&mut sink, Frame::Close, settings.write_wait).await;
    let _ = timeout(settings.write_wait, sink.close()).await;
}

async fn write_frame<Si>(
    sink: &mut std::pin::Pin<Box<Si>>,
    frame: Frame,
    deadline: Duration,
) -> Result<(), String>
where
    Si: Sink<Frame>,
    Si::Error: Display,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_elapsed) => Err("write deadline exceeded".to_string()),
    }
}
