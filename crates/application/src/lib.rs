//! 应用层实现。
//!
//! 连接注册中心（hub）、单个连接的双向泵，以及把已认证的 socket 接入 hub 的入口。
//! 这里不依赖任何具体的 WebSocket 实现，传输层通过 [`Frame`] 流和 sink 接入。

pub mod connection;
pub mod error;
pub mod gateway;
pub mod hub;

pub use connection::{
    CloseReason, Connection, ConnectionHandle, ConnectionState, Frame, OutboundFrame,
    PumpSettings,
};
pub use error::{ApplicationError, EnqueueError, HubError};
pub use gateway::Gateway;
pub use hub::{
    presence_policy, AllOthers, Hub, HubLoop, HubStats, MembersOf, Membership, OtherUsers,
    RecipientPolicy,
};
