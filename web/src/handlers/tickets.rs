//! Ticket endpoints.
//!
//! Identifiers arrive as path segments and are validated before they reach
//! the gate, so a malformed id is a `400` and an unknown one a `404`.

use crate::WebResult;
use crate::error::AppError;
use crate::middleware::CorrelationId;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use ticket_gate_core::store::KeyValueStore;
use ticket_gate_core::types::{Admission, EventId, EventSnapshot, StatusView, UserId};

/// Body of `POST /confirm/...`.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// `false` if the user held no live reservation.
    pub confirmed: bool,
}

/// Body of `DELETE /reservations/...`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// `false` if the user held neither a slot nor a place in the queue.
    pub canceled: bool,
}

fn parse_pair(event_id: &str, user_id: &str) -> Result<(EventId, UserId), AppError> {
    Ok((event_id.parse()?, user_id.parse()?))
}

/// Request a ticket.
///
/// # Endpoint
///
/// ```text
/// POST /buy/:event_id/:user_id
/// ```
///
/// # Response
///
/// ```json
/// {"status": "payment", "expires_at": "2025-01-01T00:05:00Z", "ttl_seconds": 300}
/// ```
///
/// # Errors
///
/// `400` for malformed ids, `404` for unknown ones, `503` when the store is
/// unavailable.
pub async fn buy<S: KeyValueStore>(
    State(state): State<AppState<S>>,
    CorrelationId(correlation_id): CorrelationId,
    Path((event_id, user_id)): Path<(String, String)>,
) -> WebResult<Json<Admission>> {
    let (event_id, user_id) = parse_pair(&event_id, &user_id)?;
    let admission = state.gate().request_ticket(&event_id, &user_id).await?;

    tracing::info!(
        correlation_id = %correlation_id,
        event_id = %event_id,
        user_id = %user_id,
        status = %admission.status(),
        "Ticket request answered"
    );
    Ok(Json(admission))
}

/// Confirm payment for a held reservation.
///
/// ```text
/// POST /confirm/:event_id/:user_id  →  {"confirmed": true}
/// ```
///
/// # Errors
///
/// Same mapping as [`buy`].
pub async fn confirm<S: KeyValueStore>(
    State(state): State<AppState<S>>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> WebResult<Json<ConfirmResponse>> {
    let (event_id, user_id) = parse_pair(&event_id, &user_id)?;
    let confirmed = state.gate().confirm(&event_id, &user_id).await?;
    Ok(Json(ConfirmResponse { confirmed }))
}

/// Give up a held slot or a place in the queue.
///
/// ```text
/// DELETE /reservations/:event_id/:user_id  →  {"canceled": true}
/// ```
///
/// # Errors
///
/// Same mapping as [`buy`].
pub async fn cancel<S: KeyValueStore>(
    State(state): State<AppState<S>>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> WebResult<Json<CancelResponse>> {
    let (event_id, user_id) = parse_pair(&event_id, &user_id)?;
    let canceled = state.gate().cancel(&event_id, &user_id).await?;
    Ok(Json(CancelResponse { canceled }))
}

/// Where a user stands.
///
/// ```text
/// GET /status/:event_id/:user_id  →  {"status": "waiting", "position": 0}
/// ```
///
/// # Errors
///
/// Same mapping as [`buy`].
pub async fn status<S: KeyValueStore>(
    State(state): State<AppState<S>>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> WebResult<Json<StatusView>> {
    let (event_id, user_id) = parse_pair(&event_id, &user_id)?;
    Ok(Json(state.gate().status(&event_id, &user_id).await?))
}

/// Stock and queue counters of one event.
///
/// ```text
/// GET /events/:event_id
/// ```
///
/// # Errors
///
/// `400` for a malformed id, `404` for an unknown event, `503` when the
/// store is unavailable.
pub async fn event_snapshot<S: KeyValueStore>(
    State(state): State<AppState<S>>,
    Path(event_id): Path<String>,
) -> WebResult<Json<EventSnapshot>> {
    let event_id: EventId = event_id.parse()?;
    Ok(Json(state.gate().snapshot(&event_id).await?))
}
