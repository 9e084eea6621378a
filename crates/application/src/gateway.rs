//! 连接升级入口
//!
//! 用户身份只在这里进入 hub：校验令牌、查询用户展示信息、构造连接并注册。

use std::sync::Arc;

use config::HubConfig;
use domain::{AuthError, Principal, TokenValidator, UserDirectory};

use crate::connection::{CloseReason, Connection, ConnectionHandle, PumpSettings};
use crate::error::ApplicationError;
use crate::hub::{AllOthers, Hub, RecipientPolicy};

#[derive(Clone)]
pub struct Gateway {
    hub: Hub,
    validator: Arc<dyn TokenValidator>,
    directory: Arc<dyn UserDirectory>,
    audience: Arc<dyn RecipientPolicy>,
    outbound_capacity: usize,
    settings: PumpSettings,
}

impl Gateway {
    pub fn new(
        hub: Hub,
        validator: Arc<dyn TokenValidator>,
        directory: Arc<dyn UserDirectory>,
        config: &HubConfig,
    ) -> Self {
        Self {
            hub,
            validator,
            directory,
            audience: Arc::new(AllOthers),
            outbound_capacity: config.outbound_capacity,
            settings: PumpSettings::from(config),
        }
    }

    /// 替换客户端消息的接收方策略，默认是除发送连接外的所有连接
    pub fn with_audience(mut self, audience: Arc<dyn RecipientPolicy>) -> Self {
        self.audience = audience;
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// 只校验凭据，便于在协议升级前拒绝请求
    pub async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
        self.validator.validate(credential).await.map_err(|err| {
            tracing::info!(error = %err, "credential rejected");
            err
        })
    }

    /// 为已认证的调用方建立连接并注册到 hub
    ///
    /// 用户查询失败时不会注册；调用方应当关闭原始 socket。返回的连接在调用
    /// [`Connection::run`] 前被丢弃时会自动注销。
    pub async fn admit(&self, principal: Principal) -> Result<Connection, ApplicationError> {
        let profile = match self.directory.lookup(principal.user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(user_id = %principal.user_id, error = %err, "user lookup failed");
                return Err(AuthError::UserLookupFailed {
                    user_id: principal.user_id,
                }
                .into());
            }
        };

        let (handle, queue) = ConnectionHandle::new(principal, profile, self.outbound_capacity);
        if let Err(err) = self.hub.register(handle.clone()).await {
            tracing::warn!(
                connection_id = %handle.id(),
                user_id = %principal.user_id,
                error = %err,
                "connection not admitted"
            );
            handle.begin_draining(CloseReason::Shutdown);
            return Err(err.into());
        }

        Ok(Connection::new(
            handle,
            queue,
            self.hub.clone(),
            Arc::clone(&self.audience),
            self.settings.clone(),
        ))
    }

    /// 校验凭据并建立连接
    pub async fn establish(&self, credential: &str) -> Result<Connection, ApplicationError> {
        let principal = self.authenticate(credential).await?;
        self.admit(principal).await
    }
}
