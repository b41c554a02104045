//! Per-(event, user) status records.
//!
//! The status record is the single source of truth for where a user stands on
//! an event. Admission, promotion and expiry write it inside the same
//! transaction as the queue they move the user through, so it never disagrees
//! with the queues.

use std::time::Duration;
use ticket_gate_core::StoreError;
use ticket_gate_core::keys::KeySpace;
use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction};
use ticket_gate_core::types::{EventId, UserId, UserStatus};

/// Reads and stages writes of [`UserStatus`] records.
#[derive(Clone, Debug)]
pub struct UserStatusTracker<S> {
    store: S,
    keys: KeySpace,
}

impl<S: KeyValueStore> UserStatusTracker<S> {
    /// Create a tracker over `store`.
    #[must_use]
    pub const fn new(store: S, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Current status; an absent record is [`UserStatus::None`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for an unrecognised stored value, or the
    /// store's own error.
    pub async fn get(&self, event_id: &EventId, user_id: &UserId) -> Result<UserStatus, StoreError> {
        let key = self.keys.user_status(event_id, user_id);
        let raw = self.store.get(&key).await?;
        UserStatus::from_stored(raw.as_deref()).ok_or_else(|| StoreError::Corrupt {
            key,
            value: raw.unwrap_or_default(),
        })
    }

    /// Overwrite the status outside any transaction.
    ///
    /// [`UserStatus::None`] deletes the record. `ttl` of `None` means the
    /// record never expires.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn set_status(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        status: UserStatus,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let key = self.keys.user_status(event_id, user_id);
        match status.as_stored() {
            Some(value) => {
                let ttl_ms = ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
                self.store.set(&key, value, ttl_ms).await
            }
            None => {
                let mut tx = Transaction::new();
                tx.mutate(Mutation::Delete { key });
                self.store.execute(&tx).await.map(|_| ())
            }
        }
    }

    /// Guard that the status still equals `observed`. Returns the guard index.
    pub fn stage_expect(
        &self,
        tx: &mut Transaction,
        event_id: &EventId,
        user_id: &UserId,
        observed: UserStatus,
    ) -> usize {
        tx.guard(Guard::ValueEquals {
            key: self.keys.user_status(event_id, user_id),
            expected: observed.as_stored().map(str::to_string),
        })
    }

    /// Write `status` as part of `tx`. [`UserStatus::None`] deletes the record.
    pub fn stage_set(
        &self,
        tx: &mut Transaction,
        event_id: &EventId,
        user_id: &UserId,
        status: UserStatus,
    ) {
        let key = self.keys.user_status(event_id, user_id);
        let mutation = match status.as_stored() {
            Some(value) => Mutation::Set {
                key,
                value: value.to_string(),
                ttl_ms: None,
            },
            None => Mutation::Delete { key },
        };
        tx.mutate(mutation);
    }
}
