//! Read-only registries of events and users.
//!
//! The gate never mutates these. They are built once at startup (from
//! configuration) and injected, so lookups need no store round trip.

use crate::error::GateError;
use crate::types::{EventId, UserId};
use std::collections::{BTreeMap, BTreeSet};

/// Existence lookups the gate relies on before touching the store.
pub trait Directory: Send + Sync {
    /// Total stock of an event, `None` if the event is unknown.
    fn lookup_event(&self, event_id: &EventId) -> Option<u32>;

    /// Whether the user is known.
    fn lookup_user(&self, user_id: &UserId) -> bool;

    /// Every known event, in a stable order.
    fn events(&self) -> Vec<EventId>;
}

/// Directory backed by fixed maps.
///
/// # Example
///
/// ```
/// use ticket_gate_core::catalog::{Directory, StaticDirectory};
/// use ticket_gate_core::types::{EventId, UserId};
///
/// let directory = StaticDirectory::parse("1001:1,2002:20", "u1,u2").unwrap();
/// assert_eq!(directory.lookup_event(&EventId::new("2002")), Some(20));
/// assert!(directory.lookup_user(&UserId::new("u2")));
/// assert!(!directory.lookup_user(&UserId::new("u9")));
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    events: BTreeMap<EventId, u32>,
    users: BTreeSet<UserId>,
}

impl StaticDirectory {
    /// Build from explicit collections.
    #[must_use]
    pub fn new(
        events: impl IntoIterator<Item = (EventId, u32)>,
        users: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            events: events.into_iter().collect(),
            users: users.into_iter().collect(),
        }
    }

    /// Parse `"event:stock,event:stock"` and `"user,user"` lists.
    ///
    /// Blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] on a malformed entry or a duplicate event.
    pub fn parse(events: &str, users: &str) -> Result<Self, GateError> {
        let mut parsed_events = BTreeMap::new();
        for entry in events.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, stock) = entry
                .split_once(':')
                .ok_or_else(|| GateError::Config(format!("event entry {entry:?} is not id:stock")))?;
            let id: EventId = id
                .trim()
                .parse()
                .map_err(|e| GateError::Config(format!("{e}")))?;
            let stock: u32 = stock
                .trim()
                .parse()
                .map_err(|e| GateError::Config(format!("stock of event {id}: {e}")))?;
            if parsed_events.insert(id.clone(), stock).is_some() {
                return Err(GateError::Config(format!("event {id} listed twice")));
            }
        }

        let mut parsed_users = BTreeSet::new();
        for entry in users.split(',').map(str::trim).filter(|u| !u.is_empty()) {
            let id: UserId = entry
                .parse()
                .map_err(|e| GateError::Config(format!("{e}")))?;
            parsed_users.insert(id);
        }

        Ok(Self {
            events: parsed_events,
            users: parsed_users,
        })
    }
}

impl Directory for StaticDirectory {
    fn lookup_event(&self, event_id: &EventId) -> Option<u32> {
        self.events.get(event_id).copied()
    }

    fn lookup_user(&self, user_id: &UserId) -> bool {
        self.users.contains(user_id)
    }

    fn events(&self) -> Vec<EventId> {
        self.events.keys().cloned().collect()
    }
}
