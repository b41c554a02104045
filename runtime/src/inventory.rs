//! Per-event stock counters.
//!
//! `remaining + active reservations + confirmed units == total stock` holds at
//! every commit: a unit only leaves the counter in the same transaction that
//! creates a reservation, and only comes back in the same transaction that
//! removes one.

use std::sync::Arc;
use ticket_gate_core::StoreError;
use ticket_gate_core::catalog::Directory;
use ticket_gate_core::keys::KeySpace;
use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction};
use ticket_gate_core::types::EventId;
use tracing::{debug, info};

/// Remaining-stock counter of every catalog event.
#[derive(Clone)]
pub struct TicketInventory<S> {
    store: S,
    keys: KeySpace,
    directory: Arc<dyn Directory>,
}

impl<S: KeyValueStore> TicketInventory<S> {
    /// Create an inventory over `store` for the events in `directory`.
    #[must_use]
    pub fn new(store: S, keys: KeySpace, directory: Arc<dyn Directory>) -> Self {
        Self {
            store,
            keys,
            directory,
        }
    }

    /// Initialise the counter of every catalog event that has none yet.
    ///
    /// Existing counters are left alone, so restarting the process never
    /// hands out units that live reservations or confirmations still hold.
    /// Returns the number of counters created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn seed(&self) -> Result<usize, StoreError> {
        let mut seeded = 0;
        for event_id in self.directory.events() {
            let Some(total) = self.directory.lookup_event(&event_id) else {
                continue;
            };
            let key = self.keys.stock(&event_id);
            let mut tx = Transaction::new();
            tx.guard(Guard::ValueEquals {
                key: key.clone(),
                expected: None,
            });
            tx.mutate(Mutation::Set {
                key,
                value: total.to_string(),
                ttl_ms: None,
            });

            if self.store.execute(&tx).await?.is_committed() {
                info!(event_id = %event_id, total_stock = total, "Seeded stock");
                seeded += 1;
            } else {
                debug!(event_id = %event_id, "Stock already present, left untouched");
            }
        }
        Ok(seeded)
    }

    /// Stock the event was created with, `None` for unknown events.
    #[must_use]
    pub fn total(&self, event_id: &EventId) -> Option<u32> {
        self.directory.lookup_event(event_id)
    }

    /// Units neither reserved nor consumed. A missing counter reads as `0`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for a non-numeric counter, or the
    /// store's own error.
    pub async fn remaining(&self, event_id: &EventId) -> Result<i64, StoreError> {
        let key = self.keys.stock(event_id);
        match self.store.get(&key).await? {
            None => Ok(0),
            Some(value) => value
                .parse()
                .map_err(|_| StoreError::Corrupt { key, value }),
        }
    }

    /// Guard `stock >= 1` and decrement as part of `tx`. Returns the guard index.
    pub fn stage_reserve(&self, tx: &mut Transaction, event_id: &EventId) -> usize {
        let key = self.keys.stock(event_id);
        let guard = tx.guard(Guard::CounterAtLeast {
            key: key.clone(),
            min: 1,
        });
        tx.mutate(Mutation::IncrementBy {
            key,
            delta: -1,
            ceiling: None,
        });
        guard
    }

    /// Return one unit as part of `tx`, never exceeding the total stock.
    pub fn stage_release(&self, tx: &mut Transaction, event_id: &EventId) {
        tx.mutate(Mutation::IncrementBy {
            key: self.keys.stock(event_id),
            delta: 1,
            ceiling: self.total(event_id).map(i64::from),
        });
    }

    /// Take one unit if any is left.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn try_reserve_unit(&self, event_id: &EventId) -> Result<bool, StoreError> {
        let mut tx = Transaction::new();
        self.stage_reserve(&mut tx, event_id);
        Ok(self.store.execute(&tx).await?.is_committed())
    }

    /// Give one unit back (capped at the total stock).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn release_unit(&self, event_id: &EventId) -> Result<(), StoreError> {
        let mut tx = Transaction::new();
        self.stage_release(&mut tx, event_id);
        self.store.execute(&tx).await.map(|_| ())
    }
}
