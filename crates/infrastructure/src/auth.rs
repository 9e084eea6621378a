//! JWT 令牌校验
//!
//! HS256 签名，声明中携带用户ID和管理员标记，校验签名、有效期、生效时间和签发者。

use async_trait::async_trait;
use chrono::{Duration, Utc};
use config::JwtConfig;
use domain::{AuthError, Principal, TokenValidator, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    #[serde(default)]
    pub admin: bool,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub iss: String,
    pub sub: String,
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtTokenValidator {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenValidator {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// 生成 JWT token
    pub fn issue_token(&self, principal: Principal) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: principal.user_id.into(),
            admin: principal.is_admin,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.issuer.clone(),
            sub: principal.user_id.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    /// 验证并解析 JWT token
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|err| AuthError::unauthenticated(format!("invalid token: {err}")))
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.verify(token)?;
        tracing::debug!(user_id = %claims.user_id, admin = claims.admin, "token validated");
        Ok(Principal::new(UserId::from(claims.user_id), claims.admin))
    }
}
