//! Error responses for web handlers.
//!
//! Gate errors are mapped by [`ErrorKind`]: unknown ids become `404`, store
//! trouble becomes `503` (the caller may retry), and corrupt data or bad
//! configuration becomes `500`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use ticket_gate_core::error::{ErrorKind, GateError};
use ticket_gate_core::types::ParseIdError;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState<S>>) -> Result<Json<Admission>, AppError> {
///     let admission = state.gate().request_ticket(&event_id, &user_id).await?;
///     Ok(Json(admission))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// User-facing message
    message: String,
    /// Stable code for clients
    code: &'static str,
    /// Internal error, logged but never sent
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the internal cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// Status code this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::not_found(err.to_string()),
            ErrorKind::Unavailable => {
                Self::unavailable("Ticket service temporarily unavailable").with_source(err)
            }
            ErrorKind::Invalid => Self::internal("An internal error occurred").with_source(err),
        }
    }
}

impl From<ParseIdError> for AppError {
    fn from(err: ParseIdError) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Human-readable error message.
    error: String,
    /// Error code (for client error handling).
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(status = %self.status, code = self.code, "Request failed"),
            }
        }

        let body = ErrorResponse {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_gate_core::error::StoreError;
    use ticket_gate_core::types::{EventId, UserId};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_unknown_ids_map_to_not_found() {
        let err = AppError::from(GateError::EventNotFound(EventId::new("9")));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "[NOT_FOUND] Event 9 not found");

        let err = AppError::from(GateError::UserNotFound(UserId::new("ghost")));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_failures_map_to_unavailable() {
        let err = AppError::from(GateError::Store(StoreError::Backend("refused".into())));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        // Backend detail stays internal
        assert!(!err.to_string().contains("refused"));
    }

    #[test]
    fn test_corrupt_data_maps_to_internal() {
        let err = AppError::from(GateError::Store(StoreError::Corrupt {
            key: "stock:1".into(),
            value: "x".into(),
        }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
