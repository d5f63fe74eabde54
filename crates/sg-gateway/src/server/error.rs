//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use sg_core::error::{AuthError, ConnectionError, GatewayError, SessionError};

/// Errors returned by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid request parameters
    #[error("{0}")]
    BadRequest(String),

    /// Session token failed verification
    #[error("{0}")]
    Unauthorized(String),

    /// Token is valid but its session is gone
    #[error("Session no longer exists")]
    SessionGone,

    /// Resource not found
    #[error("{0}")]
    NotFound(String),

    /// The remote host could not be reached or refused us
    #[error("{0}")]
    BadGateway(String),

    /// Internal server error
    #[error("Internal error")]
    Internal,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::SessionGone => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Malformed => ApiError::BadRequest(err.to_string()),
            AuthError::InvalidSignature | AuthError::Expired => {
                ApiError::Unauthorized(err.to_string())
            }
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(e) => e.into(),
            GatewayError::Connection(
                e @ (ConnectionError::InvalidTarget(_)
                | ConnectionError::InvalidKey(_)
                | ConnectionError::KeyFetch(_)),
            ) => ApiError::BadRequest(e.to_string()),
            GatewayError::Connection(e) => {
                ApiError::BadGateway(format!("SSH CONNECTION ERROR: {}", e))
            }
            GatewayError::Shell(e) => ApiError::BadGateway(format!("SSH SHELL ERROR: {}", e)),
            GatewayError::Session(SessionError::NotFound(_)) => ApiError::SessionGone,
            other => {
                tracing::error!("Request failed: {}", other);
                ApiError::Internal
            }
        }
    }
}
