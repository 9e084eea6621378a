//! 用户目录实现

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{DirectoryError, UserDirectory, UserId, UserProfile};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct UserRecord {
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        let display_name = record
            .display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| record.username.clone());
        UserProfile::new(
            record.username,
            display_name,
            record.avatar_url.unwrap_or_default(),
        )
    }
}

/// 从 `users` 表读取展示信息，表结构由持久化层维护
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn lookup(&self, user_id: UserId) -> Result<UserProfile, DirectoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT username, display_name, avatar_url FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| DirectoryError::unavailable(err.to_string()))?;

        record
            .map(UserProfile::from)
            .ok_or(DirectoryError::NotFound(user_id))
    }
}

/// 内存用户目录，用于测试和本地调试
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: UserId, profile: UserProfile) {
        self.users.write().await.insert(user_id, profile);
    }

    pub async fn remove(&self, user_id: UserId) {
        self.users.write().await.remove(&user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup(&self, user_id: UserId) -> Result<UserProfile, DirectoryError> {
        self.users
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or(DirectoryError::NotFound(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_display_name_falls_back_to_username() {
        let profile = UserProfile::from(UserRecord {
            username: "alice".to_string(),
            display_name: Some(String::new()),
            avatar_url: None,
        });
        assert_eq!(profile, UserProfile::new("alice", "alice", ""));
    }
}
