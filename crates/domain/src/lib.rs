//! 聊天 hub 的核心领域模型
//!
//! 包含标识符、用户身份、消息信封及其编解码，以及认证和用户目录的接口。

pub mod envelope;
pub mod errors;
pub mod services;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use envelope::*;
pub use errors::*;
pub use services::*;
pub use user::*;
pub use value_objects::*;
