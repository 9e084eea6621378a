//! 请求凭据提取
//!
//! 升级请求可以用 `?token=` 或 `Authorization: Bearer` 携带令牌，其余接口只接受请求头。

use axum::http::{header::AUTHORIZATION, HeaderMap};
use domain::Principal;

use crate::{error::ApiError, state::AppState};

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// 查询参数优先于请求头
pub fn credential<'a>(query_token: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
}

pub async fn require_principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;
    Ok(state.gateway.authenticate(token).await?)
}

pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let principal = require_principal(state, headers).await?;
    if !principal.is_admin {
        return Err(ApiError::forbidden("admin privileges required"));
    }
    Ok(principal)
}
