//! HTTP request handlers.

pub mod health;
pub mod tickets;

pub use health::{health_check, metrics, readiness};
pub use tickets::{buy, cancel, confirm, event_snapshot, status};
