//! Bounded, time-limited payment slots.
//!
//! Each event keeps its reservations in a sorted set scored by expiry (epoch
//! milliseconds). A reservation is created, confirmed, expired or canceled in
//! one guarded transaction that also moves the stock counter and the user's
//! status, so the three can never drift apart.

use crate::inventory::TicketInventory;
use crate::metrics::ReservationMetrics;
use crate::settings::GateSettings;
use crate::status::UserStatusTracker;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use ticket_gate_core::StoreError;
use ticket_gate_core::environment::Clock;
use ticket_gate_core::keys::KeySpace;
use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction, TxOutcome};
use ticket_gate_core::types::{EventId, Reservation, UserId, UserStatus, timestamp_from_millis};
use tracing::{debug, info, warn};

/// Result of one admission attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmitAttempt {
    /// A payment slot was granted.
    Admitted(Reservation),
    /// Stock is exhausted, every slot is taken, or users are already waiting.
    NoCapacity,
    /// The user's own status changed since it was read.
    Conflict,
}

/// Payment slots of every event.
#[derive(Clone)]
pub struct PaymentAdmissionQueue<S> {
    store: S,
    keys: KeySpace,
    inventory: TicketInventory<S>,
    status: UserStatusTracker<S>,
    clock: Arc<dyn Clock>,
    max_slots: u64,
    ttl_ms: i64,
}

impl<S: KeyValueStore> PaymentAdmissionQueue<S> {
    /// Create the admission queue.
    #[must_use]
    pub fn new(
        store: S,
        keys: KeySpace,
        inventory: TicketInventory<S>,
        status: UserStatusTracker<S>,
        clock: Arc<dyn Clock>,
        settings: &GateSettings,
    ) -> Self {
        Self {
            store,
            keys,
            inventory,
            status,
            clock,
            max_slots: settings.max_payment_slots,
            ttl_ms: settings.ttl_millis(),
        }
    }

    /// Stage the grant of a slot to `user_id`: take a unit, check capacity,
    /// record the reservation and set the status to `payment`.
    pub(crate) fn stage_admit(
        &self,
        tx: &mut Transaction,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Reservation {
        let score = self.clock.now().timestamp_millis().saturating_add(self.ttl_ms);
        let reservation = Reservation::from_score(event_id.clone(), user_id.clone(), score);
        let queue = self.keys.payment_queue(event_id);

        self.inventory.stage_reserve(tx, event_id);
        tx.guard(Guard::CardinalityBelow {
            key: queue.clone(),
            limit: self.max_slots,
        });
        tx.mutate(Mutation::SortedSetAdd {
            key: queue,
            member: user_id.to_string(),
            score,
        });
        self.status.stage_set(tx, event_id, user_id, UserStatus::Payment);
        reservation
    }

    /// Try to grant a payment slot to a newcomer whose status was `observed`.
    ///
    /// Admission requires, atomically: the status is still `observed`, nobody
    /// is waiting for this event, one unit of stock is left and a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails. Nothing is written then.
    pub async fn try_admit(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        observed: UserStatus,
    ) -> Result<AdmitAttempt, StoreError> {
        let mut tx = Transaction::new();
        let status_guard = self.status.stage_expect(&mut tx, event_id, user_id, observed);
        tx.guard(Guard::ListEmpty {
            key: self.keys.waiting_list(event_id),
        });
        let reservation = self.stage_admit(&mut tx, event_id, user_id);

        let attempt = match self.store.execute(&tx).await? {
            TxOutcome::Committed => {
                info!(
                    event_id = %event_id,
                    user_id = %user_id,
                    expires_at = %reservation.expires_at,
                    "Payment slot granted"
                );
                AdmitAttempt::Admitted(reservation)
            }
            outcome if outcome.rejected_by(status_guard) => AdmitAttempt::Conflict,
            TxOutcome::Rejected { guard } => {
                debug!(event_id = %event_id, user_id = %user_id, guard, "No capacity");
                AdmitAttempt::NoCapacity
            }
        };
        Ok(attempt)
    }

    /// Confirm payment: the reservation ends and its unit is consumed for good.
    ///
    /// Returns `false` if the user holds no reservation (never admitted,
    /// already confirmed, or expired).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn confirm(&self, event_id: &EventId, user_id: &UserId) -> Result<bool, StoreError> {
        let queue = self.keys.payment_queue(event_id);
        let mut tx = Transaction::new();
        tx.guard(Guard::MemberPresent {
            key: queue.clone(),
            member: user_id.to_string(),
        });
        tx.mutate(Mutation::SortedSetRemove {
            key: queue,
            member: user_id.to_string(),
        });
        self.status.stage_set(&mut tx, event_id, user_id, UserStatus::Confirmed);

        let confirmed = self.store.execute(&tx).await?.is_committed();
        if confirmed {
            ReservationMetrics::record_confirmed();
            info!(event_id = %event_id, user_id = %user_id, "Reservation confirmed");
        }
        Ok(confirmed)
    }

    /// Expire the reservation if its deadline is at or before `now`: remove
    /// it, return its unit and mark the user `expired`.
    ///
    /// Returns `false` when there is nothing to expire, which makes repeated
    /// or concurrent expiry of the same reservation harmless.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn expire(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let queue = self.keys.payment_queue(event_id);
        let mut tx = Transaction::new();
        tx.guard(Guard::ScoreAtMost {
            key: queue.clone(),
            member: user_id.to_string(),
            max: now.timestamp_millis(),
        });
        tx.mutate(Mutation::SortedSetRemove {
            key: queue,
            member: user_id.to_string(),
        });
        self.inventory.stage_release(&mut tx, event_id);
        self.status.stage_set(&mut tx, event_id, user_id, UserStatus::Expired);

        let expired = self.store.execute(&tx).await?.is_committed();
        if expired {
            ReservationMetrics::record_expired();
            info!(event_id = %event_id, user_id = %user_id, "Reservation expired");
        }
        Ok(expired)
    }

    /// Give the slot up before it expires: the unit returns to stock and the
    /// user's status is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn cancel(&self, event_id: &EventId, user_id: &UserId) -> Result<bool, StoreError> {
        let queue = self.keys.payment_queue(event_id);
        let mut tx = Transaction::new();
        tx.guard(Guard::MemberPresent {
            key: queue.clone(),
            member: user_id.to_string(),
        });
        tx.mutate(Mutation::SortedSetRemove {
            key: queue,
            member: user_id.to_string(),
        });
        self.inventory.stage_release(&mut tx, event_id);
        self.status.stage_set(&mut tx, event_id, user_id, UserStatus::None);

        let canceled = self.store.execute(&tx).await?.is_committed();
        if canceled {
            ReservationMetrics::record_canceled();
            info!(event_id = %event_id, user_id = %user_id, "Reservation canceled");
        }
        Ok(canceled)
    }

    /// Mark a `payment` status with no reservation behind it as `expired`.
    ///
    /// Such a record is left behind when the status key and the payment queue
    /// drift apart outside the gate (key eviction, manual edits). No stock is
    /// moved: the unit, if any, went with the lost reservation.
    ///
    /// Returns `false` if the status is no longer `payment` or a reservation
    /// exists after all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn clear_orphaned(&self, event_id: &EventId, user_id: &UserId) -> Result<bool, StoreError> {
        let mut tx = Transaction::new();
        self.status.stage_expect(&mut tx, event_id, user_id, UserStatus::Payment);
        tx.guard(Guard::MemberAbsent {
            key: self.keys.payment_queue(event_id),
            member: user_id.to_string(),
        });
        self.status.stage_set(&mut tx, event_id, user_id, UserStatus::Expired);

        let cleared = self.store.execute(&tx).await?.is_committed();
        if cleared {
            warn!(event_id = %event_id, user_id = %user_id, "Cleared payment status with no reservation");
        }
        Ok(cleared)
    }

    /// Up to `limit` reservations with a deadline at or before `now`, earliest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn overdue(
        &self,
        event_id: &EventId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let due = self
            .store
            .sorted_set_range_by_score(
                &self.keys.payment_queue(event_id),
                now.timestamp_millis(),
                limit,
            )
            .await?;
        Ok(due
            .into_iter()
            .map(|(member, score)| Reservation::from_score(event_id.clone(), UserId::new(member), score))
            .collect())
    }

    /// Reservations currently holding a slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn active_count(&self, event_id: &EventId) -> Result<u64, StoreError> {
        self.store
            .sorted_set_card(&self.keys.payment_queue(event_id))
            .await
    }

    /// Deadline of the user's reservation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    pub async fn expires_at(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let score = self
            .store
            .sorted_set_score(&self.keys.payment_queue(event_id), user_id.as_str())
            .await?;
        Ok(score.map(timestamp_from_millis))
    }

    /// The clock reservations are scored against.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;
    use ticket_gate_core::catalog::StaticDirectory;
    use ticket_gate_testing::{InMemoryStore, ManualClock, test_clock};

    struct Fixture {
        store: InMemoryStore,
        clock: ManualClock,
        inventory: TicketInventory<InMemoryStore>,
        status: UserStatusTracker<InMemoryStore>,
        admission: PaymentAdmissionQueue<InMemoryStore>,
    }

    async fn fixture(events: &str, max_slots: u64) -> Fixture {
        let store = InMemoryStore::new();
        let clock = ManualClock::starting_at(test_clock().now());
        let directory = Arc::new(StaticDirectory::parse(events, "u1,u2,u3").unwrap());
        let keys = KeySpace::new();
        let inventory = TicketInventory::new(store.clone(), keys.clone(), directory);
        inventory.seed().await.unwrap();
        let status = UserStatusTracker::new(store.clone(), keys.clone());
        let settings = GateSettings {
            max_payment_slots: max_slots,
            payment_ttl: Duration::from_secs(300),
            ..GateSettings::default()
        };
        let admission = PaymentAdmissionQueue::new(
            store.clone(),
            keys,
            inventory.clone(),
            status.clone(),
            Arc::new(clock.clone()),
            &settings,
        );
        Fixture {
            store,
            clock,
            inventory,
            status,
            admission,
        }
    }

    fn ids(user: &str) -> (EventId, UserId) {
        (EventId::new("1001"), UserId::new(user))
    }

    #[tokio::test]
    async fn test_admit_takes_unit_and_sets_status() {
        let f = fixture("1001:2", 10).await;
        let (event, user) = ids("u1");

        let attempt = f.admission.try_admit(&event, &user, UserStatus::None).await.unwrap();
        let AdmitAttempt::Admitted(reservation) = attempt else {
            panic!("expected admission, got {attempt:?}");
        };
        assert_eq!(
            reservation.expires_at,
            test_clock().now() + chrono::Duration::seconds(300)
        );
        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 1);
        assert_eq!(f.admission.active_count(&event).await.unwrap(), 1);
        assert_eq!(f.status.get(&event, &user).await.unwrap(), UserStatus::Payment);
        assert_eq!(
            f.admission.expires_at(&event, &user).await.unwrap(),
            Some(reservation.expires_at)
        );
    }

    #[tokio::test]
    async fn test_admit_respects_slot_limit() {
        let f = fixture("1001:5", 1).await;
        let (event, u1) = ids("u1");
        let u2 = UserId::new("u2");

        f.admission.try_admit(&event, &u1, UserStatus::None).await.unwrap();
        let attempt = f.admission.try_admit(&event, &u2, UserStatus::None).await.unwrap();
        assert_eq!(attempt, AdmitAttempt::NoCapacity);
        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_admit_refuses_when_users_are_waiting() {
        let f = fixture("1001:5", 10).await;
        let (event, user) = ids("u1");
        let mut tx = Transaction::new();
        tx.mutate(Mutation::ListPushBack {
            key: "queue:waiting:1001".into(),
            member: "u9".into(),
        });
        f.store.execute(&tx).await.unwrap();

        let attempt = f.admission.try_admit(&event, &user, UserStatus::None).await.unwrap();
        assert_eq!(attempt, AdmitAttempt::NoCapacity);
    }

    #[tokio::test]
    async fn test_admit_reports_own_status_conflict() {
        let f = fixture("1001:5", 10).await;
        let (event, user) = ids("u1");
        f.status
            .set_status(&event, &user, UserStatus::Waiting, None)
            .await
            .unwrap();

        let attempt = f.admission.try_admit(&event, &user, UserStatus::None).await.unwrap();
        assert_eq!(attempt, AdmitAttempt::Conflict);
        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_expire_waits_for_deadline_and_is_idempotent() {
        let f = fixture("1001:1", 10).await;
        let (event, user) = ids("u1");
        f.admission.try_admit(&event, &user, UserStatus::None).await.unwrap();

        assert!(!f.admission.expire(&event, &user, f.clock.now()).await.unwrap());

        f.clock.advance(chrono::Duration::seconds(300));
        assert!(f.admission.expire(&event, &user, f.clock.now()).await.unwrap());
        assert!(!f.admission.expire(&event, &user, f.clock.now()).await.unwrap());

        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 1);
        assert_eq!(f.status.get(&event, &user).await.unwrap(), UserStatus::Expired);
        assert_eq!(f.admission.active_count(&event).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_confirm_consumes_unit() {
        let f = fixture("1001:1", 10).await;
        let (event, user) = ids("u1");
        f.admission.try_admit(&event, &user, UserStatus::None).await.unwrap();

        assert!(f.admission.confirm(&event, &user).await.unwrap());
        assert!(!f.admission.confirm(&event, &user).await.unwrap());

        f.clock.advance(chrono::Duration::hours(1));
        assert!(!f.admission.expire(&event, &user, f.clock.now()).await.unwrap());
        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 0);
        assert_eq!(f.status.get(&event, &user).await.unwrap(), UserStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_cancel_returns_unit_and_clears_status() {
        let f = fixture("1001:1", 10).await;
        let (event, user) = ids("u1");
        f.admission.try_admit(&event, &user, UserStatus::None).await.unwrap();

        assert!(f.admission.cancel(&event, &user).await.unwrap());
        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 1);
        assert_eq!(f.status.get(&event, &user).await.unwrap(), UserStatus::None);
        assert!(!f.admission.cancel(&event, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_orphaned_only_touches_status_without_reservation() {
        let f = fixture("1001:2", 10).await;
        let (event, held) = ids("u1");
        let orphan = UserId::new("u2");
        f.admission.try_admit(&event, &held, UserStatus::None).await.unwrap();
        f.status
            .set_status(&event, &orphan, UserStatus::Payment, None)
            .await
            .unwrap();

        // A live reservation is left alone
        assert!(!f.admission.clear_orphaned(&event, &held).await.unwrap());
        assert_eq!(f.status.get(&event, &held).await.unwrap(), UserStatus::Payment);

        assert!(f.admission.clear_orphaned(&event, &orphan).await.unwrap());
        assert_eq!(f.status.get(&event, &orphan).await.unwrap(), UserStatus::Expired);
        assert!(!f.admission.clear_orphaned(&event, &orphan).await.unwrap());
        assert_eq!(f.inventory.remaining(&event).await.unwrap(), 1);
        assert_eq!(f.admission.active_count(&event).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_overdue_lists_earliest_first_within_limit() {
        let f = fixture("1001:5", 10).await;
        let event = EventId::new("1001");
        for user in ["u1", "u2", "u3"] {
            f.admission
                .try_admit(&event, &UserId::new(user), UserStatus::None)
                .await
                .unwrap();
            f.clock.advance(chrono::Duration::seconds(10));
        }

        assert!(f.admission.overdue(&event, f.clock.now(), 10).await.unwrap().is_empty());

        f.clock.advance(chrono::Duration::seconds(280));
        let due = f.admission.overdue(&event, f.clock.now(), 10).await.unwrap();
        let users: Vec<_> = due.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, vec!["u1", "u2"]);

        let first = f.admission.overdue(&event, f.clock.now(), 1).await.unwrap();
        assert_eq!(first.len(), 1);
    }
}
