//! 基础设施层：令牌校验和用户目录的具体实现

pub mod auth;
pub mod directory;

pub use auth::{Claims, JwtTokenValidator};
pub use directory::{create_pg_pool, InMemoryUserDirectory, PgUserDirectory};
