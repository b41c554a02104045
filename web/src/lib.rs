//! Axum HTTP surface for the ticket admission gate.
//!
//! The handlers are a thin shell: they validate path identifiers, call one
//! [`TicketGate`](ticket_gate_runtime::TicketGate) operation and map the
//! result to JSON. All admission logic lives in the runtime crate.
//!
//! # Routes
//!
//! | Method   | Path                                   | Handler                       |
//! |----------|----------------------------------------|-------------------------------|
//! | `POST`   | `/buy/:event_id/:user_id`              | [`handlers::buy`]             |
//! | `POST`   | `/confirm/:event_id/:user_id`          | [`handlers::confirm`]         |
//! | `DELETE` | `/reservations/:event_id/:user_id`     | [`handlers::cancel`]          |
//! | `GET`    | `/status/:event_id/:user_id`           | [`handlers::status`]          |
//! | `GET`    | `/events/:event_id`                    | [`handlers::event_snapshot`]  |
//! | `GET`    | `/health`                              | [`handlers::health_check`]    |
//! | `GET`    | `/ready`                               | [`handlers::readiness`]       |
//! | `GET`    | `/metrics`                             | [`handlers::metrics`]         |
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(gate).with_metrics(handle);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, ticket_gate_web::router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{delete, get, post},
};
use ticket_gate_core::store::KeyValueStore;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router over `state`.
pub fn router<S: KeyValueStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/buy/:event_id/:user_id", post(handlers::buy::<S>))
        .route("/confirm/:event_id/:user_id", post(handlers::confirm::<S>))
        .route("/reservations/:event_id/:user_id", delete(handlers::cancel::<S>))
        .route("/status/:event_id/:user_id", get(handlers::status::<S>))
        .route("/events/:event_id", get(handlers::event_snapshot::<S>))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness::<S>))
        .route("/metrics", get(handlers::metrics::<S>))
        .layer(correlation_id_layer())
        .with_state(state)
}
