//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use ticket_gate_core::store::KeyValueStore;

/// Readiness report.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `"ready"` or `"unavailable"`.
    pub status: &'static str,
    /// Failure detail when not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness: the process is up. Does NOT touch the store.
///
/// ```text
/// GET /health  →  200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: one store round trip.
///
/// # Status Codes
///
/// - 200 OK: the store answered
/// - 503 Service Unavailable: it did not
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness<S: KeyValueStore>(
    State(state): State<AppState<S>>,
) -> (StatusCode, Json<Readiness>) {
    match state.gate().health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                message: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "unavailable",
                    message: Some(err.to_string()),
                }),
            )
        }
    }
}

/// Prometheus scrape endpoint; `404` when no recorder is installed.
///
/// ```text
/// GET /metrics
/// ```
#[allow(clippy::unused_async)]
pub async fn metrics<S: KeyValueStore>(State(state): State<AppState<S>>) -> Response {
    match state.metrics() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
