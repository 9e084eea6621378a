#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use application::{Gateway, Hub};
use axum::Router;
use config::{HubConfig, JwtConfig};
use domain::{Principal, UserId, UserProfile};
use infrastructure::{InMemoryUserDirectory, JwtTokenValidator};
use tokio::{net::TcpListener, sync::oneshot};
use uuid::Uuid;
use web_api::{router, AppState};

pub struct TestApp {
    pub router: Router,
    pub hub: Hub,
    pub tokens: JwtTokenValidator,
    pub directory: Arc<InMemoryUserDirectory>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_hub_config(HubConfig::default())
    }

    pub fn with_hub_config(hub_config: HubConfig) -> Self {
        let tokens = JwtTokenValidator::new(JwtConfig {
            secret: "web-api-test-secret-with-enough-length".to_string(),
            issuer: "chat-hub".to_string(),
            expiration_hours: 1,
        });
        let directory = Arc::new(InMemoryUserDirectory::new());
        let (hub, _task) = Hub::spawn(&hub_config);
        let gateway = Gateway::new(
            hub.clone(),
            Arc::new(tokens.clone()),
            directory.clone(),
            &hub_config,
        );
        let router = router(AppState::new(gateway, hub_config.max_message_bytes));

        Self {
            router,
            hub,
            tokens,
            directory,
        }
    }

    /// 在目录中创建用户并签发令牌
    pub async fn user(&self, username: &str, admin: bool) -> (UserId, String) {
        let user_id = UserId::from(Uuid::new_v4());
        self.directory
            .insert(user_id, UserProfile::new(username, username.to_uppercase(), ""))
            .await;
        let token = self
            .tokens
            .issue_token(Principal::new(user_id, admin))
            .expect("token issued");
        (user_id, token)
    }

    /// 签发一个目录中不存在的用户的令牌
    pub fn stranger_token(&self) -> (UserId, String) {
        let user_id = UserId::from(Uuid::new_v4());
        let token = self
            .tokens
            .issue_token(Principal::new(user_id, false))
            .expect("token issued");
        (user_id, token)
    }

    pub async fn serve(&self) -> RunningServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router.clone();

        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        RunningServer {
            addr,
            _shutdown: shutdown_tx,
        }
    }
}

pub struct RunningServer {
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl RunningServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }
}
