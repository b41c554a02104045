//! Background expiry of overdue reservations.
//!
//! Without this task a reservation that is never confirmed would hold its
//! unit forever. Every `reconcile_interval` the reconciler, for each catalog
//! event in parallel:
//!
//! 1. lists up to `reconcile_batch` reservations whose deadline has passed
//! 2. expires each one (unit back to stock, user marked `expired`)
//! 3. promotes waiting users while stock and slots allow
//!
//! Every step is a guarded transaction, so several reconcilers (or a
//! reconciler racing live requests) never double-release a unit.

use crate::gate::TicketGate;
use crate::metrics::ReconcilerMetrics;
use futures::future::join_all;
use std::time::{Duration, Instant};
use ticket_gate_core::StoreError;
use ticket_gate_core::store::KeyValueStore;
use ticket_gate_core::types::EventId;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Outcome of reconciling one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventReport {
    /// Reservations expired.
    pub expired: usize,
    /// Waiting users promoted.
    pub promoted: usize,
}

/// Outcome of one cycle over every event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Reservations expired.
    pub expired: usize,
    /// Waiting users promoted.
    pub promoted: usize,
    /// Events whose reconciliation failed (logged, retried next cycle).
    pub failed_events: usize,
}

/// Periodic expiry and promotion task.
pub struct ExpiryReconciler<S> {
    gate: TicketGate<S>,
    interval: Duration,
    batch: usize,
    shutdown: broadcast::Receiver<()>,
}

impl<S: KeyValueStore> ExpiryReconciler<S> {
    /// Create a reconciler for every event of `gate`'s catalog, stopping when
    /// `shutdown` fires (or its sender is dropped).
    #[must_use]
    pub fn new(gate: TicketGate<S>, shutdown: broadcast::Receiver<()>) -> Self {
        let interval = gate.settings().reconcile_interval;
        let batch = gate.settings().reconcile_batch;
        Self {
            gate,
            interval,
            batch,
            shutdown,
        }
    }

    /// Expire overdue reservations of one event and refill its slots from the
    /// waiting list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on the first failed store call. Expirations and
    /// promotions committed before it stand.
    pub async fn reconcile_event(&self, event_id: &EventId) -> Result<EventReport, StoreError> {
        let admission = self.gate.admission();
        let now = admission.now();

        let mut expired = 0;
        for reservation in admission.overdue(event_id, now, self.batch).await? {
            if admission.expire(event_id, &reservation.user_id, now).await? {
                expired += 1;
            }
        }

        let promoted = self.gate.waiting().promote_while_possible(event_id).await?;
        Ok(EventReport { expired, promoted })
    }

    /// Reconcile every catalog event concurrently.
    ///
    /// Per-event failures are logged and counted; they never abort the cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let events = self.gate.directory().events();

        let results = join_all(events.iter().map(|event_id| async move {
            let report = self.reconcile_event(event_id).await;
            if report.is_ok() {
                if let Ok(snapshot) = self.gate.snapshot(event_id).await {
                    ReconcilerMetrics::record_snapshot(&snapshot);
                }
            }
            (event_id, report)
        }))
        .await;

        let mut cycle = CycleReport::default();
        for (event_id, result) in results {
            match result {
                Ok(report) => {
                    cycle.expired += report.expired;
                    cycle.promoted += report.promoted;
                }
                Err(err) => {
                    error!(event_id = %event_id, error = %err, "Reconciling event failed");
                    cycle.failed_events += 1;
                }
            }
        }

        ReconcilerMetrics::record_cycle(started.elapsed(), cycle.failed_events);
        if cycle.expired > 0 || cycle.promoted > 0 {
            info!(
                expired = cycle.expired,
                promoted = cycle.promoted,
                failed_events = cycle.failed_events,
                "Reconcile cycle finished"
            );
        } else {
            debug!(failed_events = cycle.failed_events, "Reconcile cycle idle");
        }
        cycle
    }

    /// Spawn the reconciler as a background task.
    ///
    /// The task runs until the shutdown signal is received.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run cycles on the configured interval until shutdown.
    pub async fn run(&mut self) {
        // A zero period would make `interval` panic
        let period = self.interval.max(Duration::from_millis(1));
        info!(interval_ms = period.as_millis(), batch = self.batch, "Expiry reconciler started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Expiry reconciler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!("Expiry reconciler stopped");
    }
}
