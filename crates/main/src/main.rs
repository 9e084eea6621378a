//! 主应用程序入口
//!
//! 加载配置，启动 hub 控制循环和 Axum Web 服务。

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use application::{Gateway, Hub};
use config::{AppConfig, DEFAULT_CONFIG_FILE};
use infrastructure::{create_pg_pool, JwtTokenValidator, PgUserDirectory};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load(DEFAULT_CONFIG_FILE).context("failed to load configuration")?;
    if config.uses_development_secret() {
        tracing::warn!("JWT secret is the development default, set CHAT_HUB_JWT__SECRET in production");
    }

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );
    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to database")?;

    let directory = Arc::new(PgUserDirectory::new(pg_pool));
    let validator = Arc::new(JwtTokenValidator::new(config.jwt.clone()));

    let (hub, hub_task) = Hub::spawn(&config.hub);
    let gateway = Gateway::new(hub.clone(), validator, directory, &config.hub);
    let app = router(AppState::new(gateway, config.hub.max_message_bytes));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("聊天 hub 启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone(), tokio::signal::ctrl_c()))
        .await?;

    hub.shutdown().await;
    let _ = hub_task.await;
    tracing::info!("聊天 hub 已停止");

    Ok(())
}

/// Ctrl-C 时先让 hub 关闭所有连接，WebSocket 任务随之结束
async fn shutdown_signal(hub: Hub, signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(err) = signal.await {
        // 监听失败时不触发关闭，服务继续运行
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号");
    hub.shutdown().await;
}
