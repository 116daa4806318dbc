//! API error taxonomy
//!
//! Every handler failure maps to one of these variants. Storage detail is
//! logged server-side; callers only ever see the generic message.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Capture signature missing, malformed, expired, or mismatched
    #[error("Invalid signature")]
    InvalidSignature,

    /// No session token, or the token does not resolve to a user
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username or email already registered")]
    AlreadyRegistered,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request processing deadline exceeded")]
    Timeout,

    #[error("storage failure")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidSignature => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::AlreadyRegistered => (StatusCode::CONFLICT, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Timeout => {
                tracing::warn!("request exceeded processing deadline");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Storage(e) => {
                tracing::error!("storage failure: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
