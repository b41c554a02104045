//! Prometheus metrics for the admission gate.
//!
//! - Ticket requests by outcome, with latency
//! - Reservation lifecycle (confirmed, expired, canceled, promoted)
//! - Reconciler cycles and failures
//! - Per-event gauges refreshed by every reconcile cycle
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_gate_runtime::metrics::MetricsExporter;
//!
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Serve `exporter.render()` from a `/metrics` route
//! # Ok::<(), ticket_gate_runtime::metrics::MetricsError>(())
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;
use ticket_gate_core::types::EventSnapshot;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the global Prometheus recorder and renders its scrape output.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsExporter {
    /// Create an exporter that has not installed a recorder yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every gate metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves [`MetricsExporter::render`] returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Requests
    describe_counter!(
        "ticket_gate_requests_total",
        "Ticket requests by outcome (payment, waiting, confirmed, not_found, unavailable)"
    );
    describe_histogram!(
        "ticket_gate_request_duration_seconds",
        "Time taken to answer a ticket request"
    );
    describe_counter!(
        "ticket_gate_admission_conflicts_total",
        "Admission attempts retried because the user's status changed concurrently"
    );

    // Reservation lifecycle
    describe_counter!(
        "ticket_gate_reservations_confirmed_total",
        "Reservations confirmed by payment"
    );
    describe_counter!(
        "ticket_gate_reservations_expired_total",
        "Reservations expired by the reconciler"
    );
    describe_counter!(
        "ticket_gate_reservations_canceled_total",
        "Reservations and waiting entries withdrawn by their user"
    );
    describe_counter!(
        "ticket_gate_promotions_total",
        "Waiting users promoted to a payment slot"
    );
    describe_counter!(
        "ticket_gate_stale_waiting_entries_total",
        "Waiting list entries skipped because their user had left the waiting state"
    );

    // Reconciler
    describe_counter!("ticket_gate_reconcile_cycles_total", "Reconcile cycles run");
    describe_histogram!(
        "ticket_gate_reconcile_duration_seconds",
        "Time taken by one reconcile cycle across every event"
    );
    describe_counter!(
        "ticket_gate_reconcile_failures_total",
        "Events whose reconciliation failed within a cycle"
    );

    // Per-event state
    describe_gauge!("ticket_gate_remaining_stock", "Units neither reserved nor consumed");
    describe_gauge!(
        "ticket_gate_active_reservations",
        "Reservations currently holding a payment slot"
    );
    describe_gauge!("ticket_gate_waiting_users", "Users queued on the waiting list");
}

/// Request metrics recorder.
pub struct RequestMetrics;

impl RequestMetrics {
    /// Record one answered (or failed) ticket request.
    pub fn record(outcome: &'static str, duration: Duration) {
        counter!("ticket_gate_requests_total", "outcome" => outcome).increment(1);
        histogram!("ticket_gate_request_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an own-status conflict that triggered a retry.
    pub fn record_conflict() {
        counter!("ticket_gate_admission_conflicts_total").increment(1);
    }
}

/// Reservation lifecycle metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a confirmed reservation.
    pub fn record_confirmed() {
        counter!("ticket_gate_reservations_confirmed_total").increment(1);
    }

    /// Record an expired reservation.
    pub fn record_expired() {
        counter!("ticket_gate_reservations_expired_total").increment(1);
    }

    /// Record a withdrawn reservation or waiting entry.
    pub fn record_canceled() {
        counter!("ticket_gate_reservations_canceled_total").increment(1);
    }

    /// Record a promotion off the waiting list.
    pub fn record_promoted() {
        counter!("ticket_gate_promotions_total").increment(1);
    }

    /// Record a skipped stale waiting entry.
    pub fn record_stale_entry() {
        counter!("ticket_gate_stale_waiting_entries_total").increment(1);
    }
}

/// Reconciler metrics recorder.
pub struct ReconcilerMetrics;

impl ReconcilerMetrics {
    /// Record a completed cycle.
    pub fn record_cycle(duration: Duration, failed_events: usize) {
        counter!("ticket_gate_reconcile_cycles_total").increment(1);
        histogram!("ticket_gate_reconcile_duration_seconds").record(duration.as_secs_f64());
        if failed_events > 0 {
            counter!("ticket_gate_reconcile_failures_total").increment(failed_events as u64);
        }
    }

    /// Publish an event's counters as gauges.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_snapshot(snapshot: &EventSnapshot) {
        let event = snapshot.event_id.to_string();
        gauge!("ticket_gate_remaining_stock", "event" => event.clone())
            .set(snapshot.remaining_stock as f64);
        gauge!("ticket_gate_active_reservations", "event" => event.clone())
            .set(snapshot.active_reservations as f64);
        gauge!("ticket_gate_waiting_users", "event" => event).set(snapshot.waiting as f64);
    }
}
