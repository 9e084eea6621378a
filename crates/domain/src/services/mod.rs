//! 领域服务接口
//!
//! hub 在建立连接时消费的两个外部协作者。

pub mod auth_service;
pub mod user_directory;

pub use auth_service::TokenValidator;
pub use user_directory::UserDirectory;

#[cfg(feature = "testing")]
pub use auth_service::MockTokenValidator;
#[cfg(feature = "testing")]
pub use user_directory::MockUserDirectory;
