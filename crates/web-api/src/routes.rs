use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
    Json, Router,
};
use domain::UserId;
use serde::{Deserialize, Serialize};

use application::HubStats;

use crate::{auth, error::ApiError, state::AppState, ws_connection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/presence", get(presence))
        .route("/hub/stats", get(hub_stats))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let credential = auth::credential(query.token.as_deref(), &headers)
        .ok_or_else(|| ApiError::bad_request("missing credential"))?;

    // 升级前完成令牌校验，失败时以普通 HTTP 响应拒绝
    let principal = state.gateway.authenticate(credential).await?;

    let gateway = state.gateway.clone();
    Ok(ws
        .max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| ws_connection::serve(socket, gateway, principal)))
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    online_users: Vec<UserId>,
    count: usize,
}

async fn presence(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PresenceResponse>, ApiError> {
    auth::require_principal(&state, &headers).await?;

    let online_users = state.hub.online_users().await?;
    Ok(Json(PresenceResponse {
        count: online_users.len(),
        online_users,
    }))
}

async fn hub_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HubStats>, ApiError> {
    auth::require_admin(&state, &headers).await?;
    Ok(Json(state.hub.stats().await?))
}
