//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_executor::ExecutorError;
use serde_json::json;

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error propagated from the lifecycle engine.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The request path or body is malformed or contains invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<fleet_core::CoreError> for GatewayError {
    fn from(err: fleet_core::CoreError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl GatewayError {
    /// HTTP status reported for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Executor(err) => match err {
                ExecutorError::VmNotFound { .. } | ExecutorError::ResourceNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                ExecutorError::InvalidRequest(_) | ExecutorError::Core(_) => StatusCode::BAD_REQUEST,
                ExecutorError::AuthFailed { .. }
                | ExecutorError::TaskFailed { .. }
                | ExecutorError::HttpStatus { .. }
                | ExecutorError::UnexpectedResponse { .. }
                | ExecutorError::Transport(_) => StatusCode::BAD_GATEWAY,
                ExecutorError::TaskTimedOut { .. } | ExecutorError::IpDiscoveryTimeout { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
