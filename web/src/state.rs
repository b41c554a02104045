//! Application state shared across all HTTP handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use ticket_gate_core::store::KeyValueStore;
use ticket_gate_runtime::TicketGate;

/// Handles every handler needs: the gate and, when installed, the metrics
/// recorder.
///
/// Cloned per request; both fields are cheap handles.
#[derive(Clone)]
pub struct AppState<S> {
    gate: TicketGate<S>,
    metrics: Option<PrometheusHandle>,
}

impl<S: KeyValueStore> AppState<S> {
    /// State without a metrics endpoint (`/metrics` answers `404`).
    #[must_use]
    pub const fn new(gate: TicketGate<S>) -> Self {
        Self {
            gate,
            metrics: None,
        }
    }

    /// Serve `handle` on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// The admission gate.
    #[must_use]
    pub const fn gate(&self) -> &TicketGate<S> {
        &self.gate
    }

    /// The Prometheus recorder handle, if one was installed.
    #[must_use]
    pub const fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_gate_testing::InMemoryStore;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState<InMemoryStore>>();
    }
}
