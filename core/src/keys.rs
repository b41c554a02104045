//! Store key layout.
//!
//! | Key                               | Type       | Holds                              |
//! |-----------------------------------|------------|------------------------------------|
//! | `tickets:stock:{event}`           | counter    | remaining stock                    |
//! | `queue:payment:{event}`           | sorted set | reservations scored by expiry (ms) |
//! | `queue:waiting:{event}`           | list       | waiting users, head first          |
//! | `user:status:{event}:{user}`      | scalar     | [`UserStatus`] of the pair         |
//!
//! An optional namespace is prepended (`{namespace}:tickets:stock:...`) so
//! several deployments or test runs can share one store.
//!
//! [`UserStatus`]: crate::types::UserStatus

use crate::types::{EventId, UserId};

/// Builds every key the gate reads or writes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Key space without a namespace.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    /// Key space under `namespace`. An empty namespace is the same as [`KeySpace::new`].
    #[must_use]
    pub fn with_namespace(namespace: &str) -> Self {
        let prefix = if namespace.is_empty() {
            String::new()
        } else {
            format!("{namespace}:")
        };
        Self { prefix }
    }

    /// Remaining-stock counter of an event.
    #[must_use]
    pub fn stock(&self, event_id: &EventId) -> String {
        format!("{}tickets:stock:{event_id}", self.prefix)
    }

    /// Reservation sorted set of an event.
    #[must_use]
    pub fn payment_queue(&self, event_id: &EventId) -> String {
        format!("{}queue:payment:{event_id}", self.prefix)
    }

    /// Waiting list of an event.
    #[must_use]
    pub fn waiting_list(&self, event_id: &EventId) -> String {
        format!("{}queue:waiting:{event_id}", self.prefix)
    }

    /// Status record of one (event, user) pair.
    #[must_use]
    pub fn user_status(&self, event_id: &EventId, user_id: &UserId) -> String {
        format!("{}user:status:{event_id}:{user_id}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let keys = KeySpace::new();
        let event = EventId::new("1001");
        assert_eq!(keys.stock(&event), "tickets:stock:1001");
        assert_eq!(keys.payment_queue(&event), "queue:payment:1001");
        assert_eq!(keys.waiting_list(&event), "queue:waiting:1001");
        assert_eq!(
            keys.user_status(&event, &UserId::new("u1")),
            "user:status:1001:u1"
        );
    }

    #[test]
    fn test_namespaced_layout() {
        let keys = KeySpace::with_namespace("staging");
        assert_eq!(keys.stock(&EventId::new("7")), "staging:tickets:stock:7");
        assert_eq!(KeySpace::with_namespace(""), KeySpace::new());
    }
}
