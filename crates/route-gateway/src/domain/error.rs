//! Gateway error taxonomy and its HTTP mapping.
//!
//! Every failure reaches the client as `{"error": "<reason>"}` with the
//! status returned by [`GatewayError::status_code`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client-visible failure of a gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Missing or malformed client input; never reaches the backend
    #[error("{0}")]
    Validation(String),

    /// No connection could be established, the write failed, or the channel
    /// dropped while the request was pending
    #[error("backend unavailable: {0}")]
    ChannelUnavailable(String),

    /// No reply within the request deadline
    #[error("backend did not reply within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The engine answered with a structured failure
    #[error("{0}")]
    Backend(String),

    /// The reply could not be parsed as the expected schema
    #[error("malformed backend reply: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ChannelUnavailable(_) | GatewayError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::ChannelUnavailable(_) => "channel_unavailable",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Backend(_) => "backend",
            GatewayError::Protocol(_) => "protocol",
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        GatewayError::Validation(reason.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        GatewayError::ChannelUnavailable(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        GatewayError::Protocol(reason.into())
    }
}

/// Error body returned for every failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
