//! FIFO overflow queue per event.
//!
//! Users who cannot be admitted are appended to the tail. Promotion only ever
//! takes the head, and does so in one transaction that also re-checks that the
//! head is unchanged and still `waiting`. A promotion that fails leaves the
//! head where it was, so order is preserved without re-enqueueing anyone.
//!
//! Entries whose user has left the `waiting` state (for example after a
//! status record was removed by hand) are stale: promotion pops and skips them.

use crate::admission::PaymentAdmissionQueue;
use crate::metrics::ReservationMetrics;
use crate::status::UserStatusTracker;
use ticket_gate_core::StoreError;
use ticket_gate_core::keys::KeySpace;
use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction, TxOutcome};
use ticket_gate_core::types::{EventId, Reservation, UserId, UserStatus};
use tracing::{debug, info, warn};

/// Result of one promotion attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Promotion {
    /// The head user now holds a payment slot.
    Promoted(Reservation),
    /// Nobody is waiting.
    Empty,
    /// Someone is waiting but there is no stock or no free slot.
    NoCapacity,
    /// The head kept moving underneath every attempt; try again later.
    Contended,
}

/// Waiting lists of every event.
#[derive(Clone)]
pub struct WaitingList<S> {
    store: S,
    keys: KeySpace,
    status: UserStatusTracker<S>,
    admission: PaymentAdmissionQueue<S>,
    max_retries: usize,
}

impl<S: KeyValueStore> WaitingList<S> {
    /// Create the waiting list. `max_retries` bounds promotion retries when
    /// the head changes concurrently.
    #[must_use]
    pub const fn new(
        store: S,
        keys: KeySpace,
        status: UserStatusTracker<S>,
        admission: PaymentAdmissionQueue<S>,
        max_retries: usize,
    ) -> Self {
        Self {
            store,
            keys,
            status,
            admission,
            max_retries,
        }
    }

    /// Append the user to the tail and mark them `waiting`, provided their
    /// status is still `observed`.
    ///
    /// Returns `false` if the status changed concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn enqueue(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        observed: UserStatus,
    ) -> Result<bool, StoreError> {
        let list = self.keys.waiting_list(event_id);
        let mut tx = Transaction::new();
        self.status.stage_expect(&mut tx, event_id, user_id, observed);
        // A stale entry of the same user would otherwise be served twice
        tx.mutate(Mutation::ListRemove {
            key: list.clone(),
            member: user_id.to_string(),
        })
        .mutate(Mutation::ListPushBack {
            key: list,
            member: user_id.to_string(),
        });
        self.status.stage_set(&mut tx, event_id, user_id, UserStatus::Waiting);

        let enqueued = self.store.execute(&tx).await?.is_committed();
        if enqueued {
            info!(event_id = %event_id, user_id = %user_id, "Queued on waiting list");
        }
        Ok(enqueued)
    }

    /// Move the head of the waiting list into a payment slot if capacity allows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a store call fails. Each step is a single
    /// transaction, so a failure never leaves a half-promoted user.
    pub async fn try_promote(&self, event_id: &EventId) -> Result<Promotion, StoreError> {
        let list = self.keys.waiting_list(event_id);
        let mut contended = 0;

        loop {
            let Some(head) = self.store.list_range(&list, 0, 0).await?.into_iter().next() else {
                return Ok(Promotion::Empty);
            };
            let user_id = UserId::new(head.clone());

            let mut tx = Transaction::new();
            let head_guard = tx.guard(Guard::ListHeadEquals {
                key: list.clone(),
                member: head,
            });

            if self.head_is_waiting(event_id, &user_id).await? {
                let status_guard =
                    self.status
                        .stage_expect(&mut tx, event_id, &user_id, UserStatus::Waiting);
                tx.mutate(Mutation::ListPopFront { key: list.clone() });
                let reservation = self.admission.stage_admit(&mut tx, event_id, &user_id);

                match self.store.execute(&tx).await? {
                    TxOutcome::Committed => {
                        ReservationMetrics::record_promoted();
                        info!(
                            event_id = %event_id,
                            user_id = %user_id,
                            expires_at = %reservation.expires_at,
                            "Promoted from waiting list"
                        );
                        return Ok(Promotion::Promoted(reservation));
                    }
                    outcome if outcome.rejected_by(head_guard) || outcome.rejected_by(status_guard) => {
                        contended += 1;
                    }
                    TxOutcome::Rejected { .. } => return Ok(Promotion::NoCapacity),
                }
            } else {
                tx.mutate(Mutation::ListPopFront { key: list.clone() });
                if self.store.execute(&tx).await?.is_committed() {
                    ReservationMetrics::record_stale_entry();
                    debug!(event_id = %event_id, user_id = %user_id, "Skipped stale waiting entry");
                } else {
                    contended += 1;
                }
            }

            if contended > self.max_retries {
                debug!(event_id = %event_id, contended, "Promotion contended, yielding");
                return Ok(Promotion::Contended);
            }
        }
    }

    /// Promote until the list is empty or capacity runs out. Returns the
    /// number of users promoted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a store call fails. Promotions committed
    /// before the failure stand.
    pub async fn promote_while_possible(&self, event_id: &EventId) -> Result<usize, StoreError> {
        let mut promoted = 0;
        while let Promotion::Promoted(_) = self.try_promote(event_id).await? {
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Number of queued users (stale entries included).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn len(&self, event_id: &EventId) -> Result<u64, StoreError> {
        self.store.list_len(&self.keys.waiting_list(event_id)).await
    }

    /// Zero-based position of the user in the queue, `None` if not queued.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn position(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<Option<u64>, StoreError> {
        let entries = self
            .store
            .list_range(&self.keys.waiting_list(event_id), 0, -1)
            .await?;
        Ok(entries
            .iter()
            .position(|entry| entry == user_id.as_str())
            .map(|index| index as u64))
    }

    /// Leave the queue. The user's status is cleared.
    ///
    /// Returns `false` if the user was not waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn cancel(&self, event_id: &EventId, user_id: &UserId) -> Result<bool, StoreError> {
        let mut tx = Transaction::new();
        self.status
            .stage_expect(&mut tx, event_id, user_id, UserStatus::Waiting);
        tx.mutate(Mutation::ListRemove {
            key: self.keys.waiting_list(event_id),
            member: user_id.to_string(),
        });
        self.status.stage_set(&mut tx, event_id, user_id, UserStatus::None);

        let canceled = self.store.execute(&tx).await?.is_committed();
        if canceled {
            ReservationMetrics::record_canceled();
            info!(event_id = %event_id, user_id = %user_id, "Left waiting list");
        }
        Ok(canceled)
    }

    async fn head_is_waiting(&self, event_id: &EventId, user_id: &UserId) -> Result<bool, StoreError> {
        match self.status.get(event_id, user_id).await {
            Ok(status) => Ok(status == UserStatus::Waiting),
            // An unreadable record must not block everyone queued behind it
            Err(StoreError::Corrupt { key, value }) => {
                warn!(key = %key, value = %value, "Treating waiting entry with corrupt status as stale");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::inventory::TicketInventory;
    use crate::settings::GateSettings;
    use std::sync::Arc;
    use ticket_gate_core::catalog::StaticDirectory;
    use ticket_gate_core::environment::Clock;
    use ticket_gate_testing::{InMemoryStore, ManualClock, test_clock};

    struct Fixture {
        store: InMemoryStore,
        clock: ManualClock,
        inventory: TicketInventory<InMemoryStore>,
        status: UserStatusTracker<InMemoryStore>,
        admission: PaymentAdmissionQueue<InMemoryStore>,
        waiting: WaitingList<InMemoryStore>,
    }

    async fn fixture(stock: u32, max_slots: u64) -> Fixture {
        let store = InMemoryStore::new();
        let clock = ManualClock::starting_at(test_clock().now());
        let directory = Arc::new(StaticDirectory::new(
            [(EventId::new("1001"), stock)],
            ["u1", "u2", "u3", "u4"].map(UserId::new),
        ));
        let keys = KeySpace::new();
        let inventory = TicketInventory::new(store.clone(), keys.clone(), directory);
        inventory.seed().await.unwrap();
        let status = UserStatusTracker::new(store.clone(), keys.clone());
        let settings = GateSettings {
            max_payment_slots: max_slots,
            ..GateSettings::default()
        };
        let admission = PaymentAdmissionQueue::new(
            store.clone(),
            keys.clone(),
            inventory.clone(),
            status.clone(),
            Arc::new(clock.clone()),
            &settings,
        );
        let waiting = WaitingList::new(store.clone(), keys, status.clone(), admission.clone(), 3);
        Fixture {
            store,
            clock,
            inventory,
            status,
            admission,
            waiting,
        }
    }

    fn event() -> EventId {
        EventId::new("1001")
    }

    async fn enqueue_all(f: &Fixture, users: &[&str]) {
        for user in users {
            assert!(
                f.waiting
                    .enqueue(&event(), &UserId::new(*user), UserStatus::None)
                    .await
                    .unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_enqueue_tracks_position() {
        let f = fixture(0, 10).await;
        enqueue_all(&f, &["u1", "u2", "u3"]).await;

        assert_eq!(f.waiting.len(&event()).await.unwrap(), 3);
        assert_eq!(
            f.waiting.position(&event(), &UserId::new("u3")).await.unwrap(),
            Some(2)
        );
        assert_eq!(
            f.waiting.position(&event(), &UserId::new("u4")).await.unwrap(),
            None
        );
        assert_eq!(
            f.status.get(&event(), &UserId::new("u2")).await.unwrap(),
            UserStatus::Waiting
        );
    }

    #[tokio::test]
    async fn test_enqueue_rejects_stale_observation() {
        let f = fixture(0, 10).await;
        enqueue_all(&f, &["u1"]).await;

        let again = f
            .waiting
            .enqueue(&event(), &UserId::new("u1"), UserStatus::None)
            .await
            .unwrap();
        assert!(!again);
        assert_eq!(f.waiting.len(&event()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_promotion_is_fifo() {
        let f = fixture(0, 10).await;
        enqueue_all(&f, &["u1", "u2", "u3"]).await;
        f.inventory.release_unit(&event()).await.unwrap(); // capped at total 0
        assert_eq!(f.waiting.try_promote(&event()).await.unwrap(), Promotion::NoCapacity);

        // Raise the counter directly to simulate two returned units
        f.store.increment_by("tickets:stock:1001", 2).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..2 {
            match f.waiting.try_promote(&event()).await.unwrap() {
                Promotion::Promoted(reservation) => order.push(reservation.user_id.to_string()),
                other => panic!("expected promotion, got {other:?}"),
            }
        }
        assert_eq!(order, vec!["u1", "u2"]);
        assert_eq!(f.waiting.try_promote(&event()).await.unwrap(), Promotion::NoCapacity);
        assert_eq!(
            f.waiting.position(&event(), &UserId::new("u3")).await.unwrap(),
            Some(0)
        );
        assert_eq!(
            f.status.get(&event(), &UserId::new("u1")).await.unwrap(),
            UserStatus::Payment
        );
    }

    #[tokio::test]
    async fn test_promotion_respects_slot_limit() {
        let f = fixture(5, 1).await;
        f.admission
            .try_admit(&event(), &UserId::new("u4"), UserStatus::None)
            .await
            .unwrap();
        enqueue_all(&f, &["u1"]).await;

        assert_eq!(f.waiting.try_promote(&event()).await.unwrap(), Promotion::NoCapacity);
        assert_eq!(f.inventory.remaining(&event()).await.unwrap(), 4);

        f.clock.advance(chrono::Duration::minutes(10));
        assert!(
            f.admission
                .expire(&event(), &UserId::new("u4"), f.clock.now())
                .await
                .unwrap()
        );
        assert!(matches!(
            f.waiting.try_promote(&event()).await.unwrap(),
            Promotion::Promoted(_)
        ));
    }

    #[tokio::test]
    async fn test_stale_entries_are_skipped() {
        let f = fixture(1, 10).await;
        enqueue_all(&f, &["u1", "u2"]).await;
        f.status
            .set_status(&event(), &UserId::new("u1"), UserStatus::None, None)
            .await
            .unwrap();

        let promotion = f.waiting.try_promote(&event()).await.unwrap();
        let Promotion::Promoted(reservation) = promotion else {
            panic!("expected promotion, got {promotion:?}");
        };
        assert_eq!(reservation.user_id, UserId::new("u2"));
        assert_eq!(f.waiting.len(&event()).await.unwrap(), 0);
        assert_eq!(f.waiting.try_promote(&event()).await.unwrap(), Promotion::Empty);
    }

    #[tokio::test]
    async fn test_promote_while_possible_stops_at_capacity() {
        let f = fixture(2, 10).await;
        enqueue_all(&f, &["u1", "u2", "u3"]).await;

        assert_eq!(f.waiting.promote_while_possible(&event()).await.unwrap(), 2);
        assert_eq!(f.inventory.remaining(&event()).await.unwrap(), 0);
        assert_eq!(f.admission.active_count(&event()).await.unwrap(), 2);
        assert_eq!(f.waiting.len(&event()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_leaves_queue() {
        let f = fixture(0, 10).await;
        enqueue_all(&f, &["u1", "u2"]).await;

        assert!(f.waiting.cancel(&event(), &UserId::new("u1")).await.unwrap());
        assert!(!f.waiting.cancel(&event(), &UserId::new("u1")).await.unwrap());
        assert_eq!(
            f.waiting.position(&event(), &UserId::new("u2")).await.unwrap(),
            Some(0)
        );
        assert_eq!(
            f.status.get(&event(), &UserId::new("u1")).await.unwrap(),
            UserStatus::None
        );
    }
}
