//! # Ticket Gate Testing
//!
//! Testing utilities for the ticket admission gate.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a complete, atomic, in-process [`KeyValueStore`]
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - proptest strategies for identifiers
//!
//! ## Example
//!
//! ```ignore
//! use ticket_gate_testing::{InMemoryStore, ManualClock, test_clock};
//!
//! #[tokio::test]
//! async fn test_reservation_expires() {
//!     let clock = ManualClock::starting_at(test_clock().now());
//!     let gate = TicketGate::new(InMemoryStore::new(), directory, Arc::new(clock.clone()), settings);
//!
//!     gate.request_ticket(&event, &user).await?;
//!     clock.advance(chrono::Duration::minutes(6));
//!     reconciler.run_cycle().await;
//! }
//! ```
//!
//! [`KeyValueStore`]: ticket_gate_core::store::KeyValueStore

use chrono::{DateTime, Utc};
use ticket_gate_core::environment::Clock;

pub mod memory;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_gate_testing::mocks::FixedClock;
    /// use ticket_gate_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test keeps one handle and gives the
    /// other to the code under test.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_gate_testing::mocks::{ManualClock, test_clock};
    /// use ticket_gate_core::environment::Clock;
    ///
    /// let clock = ManualClock::starting_at(test_clock().now());
    /// let handle = clock.clone();
    /// handle.advance(chrono::Duration::seconds(301));
    /// assert_eq!(clock.now(), test_clock().now() + chrono::Duration::seconds(301));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward, with a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use ticket_gate_core::types::{EventId, UserId};

    /// Valid event identifiers.
    pub fn event_id() -> impl Strategy<Value = EventId> {
        "[0-9]{1,6}".prop_map(EventId::new)
    }

    /// Valid user identifiers.
    pub fn user_id() -> impl Strategy<Value = UserId> {
        "u[a-z0-9]{1,8}".prop_map(UserId::new)
    }

    /// `count` distinct user identifiers `u0..u{count-1}`.
    #[must_use]
    pub fn user_ids(count: usize) -> Vec<UserId> {
        (0..count).map(|i| UserId::new(format!("u{i}"))).collect()
    }
}

// Re-export commonly used items
pub use memory::InMemoryStore;
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_manual_clock_shares_time_between_clones() {
        let clock = ManualClock::starting_at(test_clock().now());
        let handle = clock.clone();
        handle.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::minutes(5));

        handle.set(test_clock().now());
        assert_eq!(clock.now(), test_clock().now());
    }

    proptest! {
        #[test]
        fn generated_ids_are_valid(event in properties::event_id(), user in properties::user_id()) {
            prop_assert!(event.as_str().parse::<ticket_gate_core::types::EventId>().is_ok());
            prop_assert!(user.as_str().parse::<ticket_gate_core::types::UserId>().is_ok());
        }
    }
}
