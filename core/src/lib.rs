//! # Ticket Gate Core
//!
//! Core types and contracts for an admission-control gate over a limited
//! stock of event tickets.
//!
//! Concurrent requesters are assigned one of {payment slot, waiting list}
//! while the gate keeps three promises:
//!
//! - stock never goes negative, and every unit is either available, reserved
//!   or consumed
//! - at most `max_payment_slots` reservations are active per event
//! - the waiting list is served first in, first out
//!
//! This crate holds no I/O. It defines:
//!
//! - **Types** ([`types`]): identifiers, the per-user status machine, results
//! - **Errors** ([`error`]): `StoreError`, `GateError` and their classification
//! - **Store contract** ([`store`]): the guarded-transaction key-value store
//!   every component is written against
//! - **Key layout** ([`keys`])
//! - **Directory** ([`catalog`]): read-only event and user registries
//! - **Environment** ([`environment`]): injected clock

#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod keys;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ErrorKind, GateError, Result, StoreError};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - advance time explicitly to expire reservations
    /// let clock = ManualClock::new(start);
    /// clock.advance(chrono::Duration::minutes(6));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
