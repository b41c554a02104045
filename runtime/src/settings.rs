//! Tunables shared by the admission components.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Gate tunables.
///
/// # Default Values
///
/// | Setting               | Default |
/// |-----------------------|---------|
/// | `max_payment_slots`   | 1000    |
/// | `payment_ttl`         | 5 min   |
/// | `reconcile_interval`  | 5 s     |
/// | `reconcile_batch`     | 500     |
/// | `admission_retries`   | 3       |
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Maximum concurrent reservations per event.
    pub max_payment_slots: u64,
    /// Length of the payment window granted on admission.
    pub payment_ttl: Duration,
    /// Period of the expiry reconciler.
    pub reconcile_interval: Duration,
    /// Overdue reservations handled per event per cycle.
    pub reconcile_batch: usize,
    /// Backoff between optimistic retries; `max_retries` bounds admission
    /// and promotion retries alike.
    pub retry: RetryPolicy,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_payment_slots: 1000,
            payment_ttl: Duration::from_secs(300),
            reconcile_interval: Duration::from_secs(5),
            reconcile_batch: 500,
            retry: RetryPolicy::default(),
        }
    }
}

impl GateSettings {
    /// Payment window in whole seconds, as reported to callers.
    #[must_use]
    pub const fn ttl_seconds(&self) -> u64 {
        self.payment_ttl.as_secs()
    }

    /// Payment window in milliseconds, saturating.
    #[must_use]
    pub fn ttl_millis(&self) -> i64 {
        i64::try_from(self.payment_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}
