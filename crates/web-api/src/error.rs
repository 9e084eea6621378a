use application::{ApplicationError, HubError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::AuthError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthenticated { reason } => {
                ApiError::new(StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED", reason)
            }
            AuthError::UserLookupFailed { user_id } => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "USER_LOOKUP_FAILED",
                format!("user {user_id} could not be resolved"),
            ),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        let code = match error {
            HubError::ConnectionLimitReached { .. } => "CONNECTION_LIMIT_REACHED",
            HubError::Overloaded => "HUB_OVERLOADED",
            HubError::Stopped => "HUB_STOPPED",
        };
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, code, error.to_string())
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match error {
            ApplicationError::Authentication(err) => err.into(),
            ApplicationError::Hub(err) => err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
