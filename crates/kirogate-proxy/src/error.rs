//! Anthropic-style API error surface.
//!
//! Every handler failure maps onto the published error body
//! `{type: "error", error: {type, message}, request_id}` with the matching
//! HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    RequestTooLarge(String),

    #[error("{0}")]
    RateLimit(String),

    #[error("{0}")]
    Api(String),

    #[error("{0}")]
    Overloaded(String),
}

impl ApiError {
    /// Anthropic error-type discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request_error",
            ApiError::Authentication(_) => "authentication_error",
            ApiError::Permission(_) => "permission_error",
            ApiError::NotFound(_) => "not_found_error",
            ApiError::RequestTooLarge(_) => "request_too_large",
            ApiError::RateLimit(_) => "rate_limit_error",
            ApiError::Api(_) => "api_error",
            ApiError::Overloaded(_) => "overloaded_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Permission(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RequestTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Api(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // 529 has no named constant; Anthropic's overloaded status.
            ApiError::Overloaded(_) => StatusCode::from_u16(529)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "type": "error",
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            },
            "request_id": format!("req_{}", Uuid::new_v4().simple()),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthExpired(msg) => ApiError::Authentication(msg),
            AuthError::Permission(msg) => ApiError::Permission(msg),
            AuthError::RateLimited(msg) => ApiError::RateLimit(msg),
            AuthError::UpstreamUnavailable(msg) => ApiError::Overloaded(msg),
            other => ApiError::Api(other.to_string()),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        ApiError::Api(err.to_string())
    }
}
