//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 升级入口以及少量只读的 hub 查询接口。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
