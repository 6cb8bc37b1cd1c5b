//! Relay error types with HTTP status code mapping.
//!
//! [`RelayError`] is surfaced only at the producer boundary (REST handlers,
//! message construction) and by the WebSocket command parser. Fan-out
//! through [`crate::service::Relay`] never returns it: per-connection
//! failures are isolated as [`TransportError`]s and handled by the
//! connection registry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid message: progress must be within 0..=100, got 140"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Producer-facing error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status               |
/// |-----------|-----------------|---------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request           |
/// | 2000–2999 | Not Found       | 404 Not Found             |
/// | 3000–3999 | Server          | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A message failed validation at construction time.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Request validation failed (bad identity, topic, or body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation named an identity with no active connection.
    #[error("no active connection for identity {0}")]
    UnknownIdentity(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidMessage(_) => 1002,
            Self::UnknownIdentity(_) => 2001,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            Self::UnknownIdentity(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Failure writing to, or closing, a single connection's transport.
///
/// Always isolated to the connection it occurred on: it ends that
/// connection's delivery loop and triggers its disconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer has gone away or the socket was already closed.
    #[error("transport closed")]
    Closed,

    /// The underlying write failed.
    #[error("transport write failed: {0}")]
    Write(String),
}
