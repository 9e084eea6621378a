//! 线上消息信封及其编解码
//!
//! 信封是带类型标签、带时间戳的 JSON 结构：
//! `{"type": ..., "timestamp": <RFC3339>, "payload": {...}}`。
//! 载荷对 hub 来说是不透明的，解码后按原始字节保留，转发时逐字节写回。

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{DecodeError, Timestamp, UserId, UserProfile};

/// 事件类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Typing,
    ReadReceipt,
    UserJoin,
    UserLeave,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Typing => "typing",
            EventKind::ReadReceipt => "read_receipt",
            EventKind::UserJoin => "user_join",
            EventKind::UserLeave => "user_leave",
            EventKind::Error => "error",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "message" => Some(EventKind::Message),
            "typing" => Some(EventKind::Typing),
            "read_receipt" => Some(EventKind::ReadReceipt),
            "user_join" => Some(EventKind::UserJoin),
            "user_leave" => Some(EventKind::UserLeave),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    /// 客户端允许发送的事件类型；在线状态和错误只能由服务端合成
    pub fn is_client_event(self) -> bool {
        matches!(
            self,
            EventKind::Message | EventKind::Typing | EventKind::ReadReceipt
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 不可变的消息信封
///
/// 从一个连接的入站循环流向 hub，再流向零个或多个其他连接的出站队列，途中不做修改。
#[derive(Debug, Clone)]
pub struct Envelope {
    kind: EventKind,
    timestamp: Timestamp,
    sender: Option<UserId>,
    payload: Box<RawValue>,
}

/// 只读取类型标签，其余字段留给第二遍解析
#[derive(Deserialize)]
struct WireTag {
    #[serde(rename = "type")]
    kind: String,
}

/// 服务端编码的信封，带 sender
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    sender: Option<UserId>,
    #[serde(default)]
    payload: Option<Box<RawValue>>,
}

/// 客户端发来的信封，不读取 sender
#[derive(Deserialize)]
struct InboundWireEnvelope {
    #[serde(default)]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    payload: Option<Box<RawValue>>,
}

fn malformed(err: serde_json::Error) -> DecodeError {
    DecodeError::MalformedEnvelope(err.to_string())
}

/// 在线状态事件载荷
#[derive(Debug, Serialize)]
struct PresencePayload<'a> {
    user_id: UserId,
    username: &'a str,
    display_name: &'a str,
    avatar_url: &'a str,
}

#[derive(Debug, Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

fn raw_payload<T: Serialize>(value: &T) -> Box<RawValue> {
    serde_json::value::to_raw_value(value).unwrap_or_else(|_| RawValue::NULL.to_owned())
}

impl Envelope {
    pub fn new(kind: EventKind, timestamp: Timestamp, payload: Box<RawValue>) -> Self {
        Self {
            kind,
            timestamp,
            sender: None,
            payload,
        }
    }

    /// 用户上线事件
    pub fn user_join(user_id: UserId, profile: &UserProfile, at: Timestamp) -> Self {
        Self::presence(EventKind::UserJoin, user_id, profile, at)
    }

    /// 用户下线事件
    pub fn user_leave(user_id: UserId, profile: &UserProfile, at: Timestamp) -> Self {
        Self::presence(EventKind::UserLeave, user_id, profile, at)
    }

    fn presence(kind: EventKind, user_id: UserId, profile: &UserProfile, at: Timestamp) -> Self {
        let payload = raw_payload(&PresencePayload {
            user_id,
            username: &profile.username,
            display_name: &profile.display_name,
            avatar_url: &profile.avatar_url,
        });
        Self::new(kind, at, payload)
    }

    /// 回送给发送方的错误事件
    pub fn error(message: &str, at: Timestamp) -> Self {
        Self::new(EventKind::Error, at, raw_payload(&ErrorPayload { error: message }))
    }

    /// 标记服务端认定的发送者，客户端自带的 sender 已由 [`Envelope::decode_inbound`] 忽略
    pub fn from_sender(mut self, sender: UserId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn sender(&self) -> Option<UserId> {
        self.sender
    }

    /// 原始载荷 JSON 文本
    pub fn payload(&self) -> &str {
        self.payload.get()
    }

    /// 解码一帧，保留服务端写入的 sender。
    ///
    /// 先单独解析类型标签：标签无法识别时返回 `UnknownTag`，不论其余字段是否合法。
    /// 缺省的时间戳以接收时刻补齐，缺省的载荷视为 `null`。
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let kind = Self::decode_tag(bytes)?;
        let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(malformed)?;

        Ok(Self {
            kind,
            timestamp: wire.timestamp.unwrap_or_else(Utc::now),
            sender: wire.sender,
            payload: wire.payload.unwrap_or_else(|| RawValue::NULL.to_owned()),
        })
    }

    /// 解码客户端发来的一帧，忽略其中的 sender 字段
    pub fn decode_inbound(bytes: &[u8]) -> Result<Self, DecodeError> {
        let kind = Self::decode_tag(bytes)?;
        let wire: InboundWireEnvelope = serde_json::from_slice(bytes).map_err(malformed)?;

        Ok(Self {
            kind,
            timestamp: wire.timestamp.unwrap_or_else(Utc::now),
            sender: None,
            payload: wire.payload.unwrap_or_else(|| RawValue::NULL.to_owned()),
        })
    }

    fn decode_tag(bytes: &[u8]) -> Result<EventKind, DecodeError> {
        let tag: WireTag = serde_json::from_slice(bytes).map_err(malformed)?;
        EventKind::parse(&tag.kind).ok_or(DecodeError::UnknownTag(tag.kind))
    }

    /// 编码为线上 JSON 文本，不会失败
    pub fn encode(&self) -> String {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        let payload = self.payload.get();
        let mut out = String::with_capacity(64 + timestamp.len() + payload.len());

        out.push_str(r#"{"type":""#);
        out.push_str(self.kind.as_str());
        out.push_str(r#"","timestamp":""#);
        out.push_str(&timestamp);
        out.push('"');
        if let Some(sender) = self.sender {
            out.push_str(r#","sender":""#);
            out.push_str(&sender.to_string());
            out.push('"');
        }
        out.push_str(r#","payload":"#);
        out.push_str(payload);
        out.push('}');
        out
    }
}
