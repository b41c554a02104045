//! Top-level orchestration: the single entry point for ticket requests.
//!
//! ```text
//! none|expired ──[stock, free slot, nobody waiting]──▶ payment
//! none|expired ──otherwise──────────────────────────▶ waiting
//! waiting|payment|confirmed ──request──▶ unchanged (idempotent)
//! payment ──confirm──▶ confirmed        payment ──cancel──▶ none
//! payment ──deadline + reconciler──▶ expired     waiting ──cancel──▶ none
//! ```
//!
//! Every transition is one guarded store transaction. The only retry loop is
//! for optimistic conflicts on the requesting user's own status; running out
//! of stock or slots is never an error and always ends on the waiting list.

use crate::admission::{AdmitAttempt, PaymentAdmissionQueue};
use crate::inventory::TicketInventory;
use crate::metrics::RequestMetrics;
use crate::settings::GateSettings;
use crate::status::UserStatusTracker;
use crate::waiting::WaitingList;
use std::sync::Arc;
use std::time::Instant;
use ticket_gate_core::catalog::Directory;
use ticket_gate_core::environment::Clock;
use ticket_gate_core::error::{ErrorKind, GateError, Result};
use ticket_gate_core::keys::KeySpace;
use ticket_gate_core::store::KeyValueStore;
use ticket_gate_core::types::{Admission, EventId, EventSnapshot, StatusView, UserId, UserStatus};
use tracing::{debug, warn};

/// The admission gate over one store.
///
/// Cheap to clone: every component holds a store handle and `Arc`s.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ticket_gate_core::catalog::StaticDirectory;
/// use ticket_gate_core::environment::SystemClock;
/// use ticket_gate_core::keys::KeySpace;
/// use ticket_gate_core::types::{EventId, UserId};
/// use ticket_gate_runtime::{GateSettings, TicketGate};
/// use ticket_gate_testing::InMemoryStore;
///
/// # async fn example() -> ticket_gate_core::Result<()> {
/// let directory = StaticDirectory::parse("1001:1", "u1,u2")?;
/// let gate = TicketGate::new(
///     InMemoryStore::new(),
///     KeySpace::new(),
///     Arc::new(directory),
///     Arc::new(SystemClock),
///     GateSettings::default(),
/// );
/// gate.seed_stock().await?;
///
/// let admission = gate.request_ticket(&EventId::new("1001"), &UserId::new("u1")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TicketGate<S> {
    store: S,
    directory: Arc<dyn Directory>,
    inventory: TicketInventory<S>,
    status: UserStatusTracker<S>,
    admission: PaymentAdmissionQueue<S>,
    waiting: WaitingList<S>,
    settings: GateSettings,
}

impl<S: KeyValueStore> TicketGate<S> {
    /// Wire every component over `store`.
    #[must_use]
    pub fn new(
        store: S,
        keys: KeySpace,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
        settings: GateSettings,
    ) -> Self {
        let inventory = TicketInventory::new(store.clone(), keys.clone(), Arc::clone(&directory));
        let status = UserStatusTracker::new(store.clone(), keys.clone());
        let admission = PaymentAdmissionQueue::new(
            store.clone(),
            keys.clone(),
            inventory.clone(),
            status.clone(),
            clock,
            &settings,
        );
        let waiting = WaitingList::new(
            store.clone(),
            keys,
            status.clone(),
            admission.clone(),
            settings.retry.max_retries,
        );
        Self {
            store,
            directory,
            inventory,
            status,
            admission,
            waiting,
            settings,
        }
    }

    /// Initialise missing stock counters. See [`TicketInventory::seed`].
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Store`] if the store call fails.
    pub async fn seed_stock(&self) -> Result<usize> {
        Ok(self.inventory.seed().await?)
    }

    /// Request a ticket.
    ///
    /// Newcomers (and users whose reservation expired) get a payment slot
    /// when one is free and nobody is waiting, otherwise a place on the
    /// waiting list. Users who already hold a slot, a place in the queue or a
    /// confirmed ticket get their current state back unchanged.
    ///
    /// # Errors
    ///
    /// - [`GateError::EventNotFound`] / [`GateError::UserNotFound`]
    /// - [`GateError::Store`] if the store fails; nothing is committed
    /// - [`GateError::Contended`] if the user's own status kept changing
    #[tracing::instrument(skip_all, fields(event_id = %event_id, user_id = %user_id), name = "request_ticket")]
    pub async fn request_ticket(&self, event_id: &EventId, user_id: &UserId) -> Result<Admission> {
        let started = Instant::now();
        let result = self.admit_or_queue(event_id, user_id).await;

        let outcome = match &result {
            Ok(admission) => admission.status().as_stored().unwrap_or("none"),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => "not_found",
                ErrorKind::Unavailable => "unavailable",
                ErrorKind::Invalid => "invalid",
            },
        };
        RequestMetrics::record(outcome, started.elapsed());
        if let Err(err) = &result {
            warn!(error = %err, "Ticket request failed");
        }
        result
    }

    async fn admit_or_queue(&self, event_id: &EventId, user_id: &UserId) -> Result<Admission> {
        self.validate(event_id, user_id)?;
        let attempts = self.settings.retry.max_retries + 1;

        for attempt in 0..attempts {
            let status = self.status.get(event_id, user_id).await?;
            match status {
                UserStatus::Waiting => return Ok(Admission::Waiting),
                UserStatus::Confirmed => return Ok(Admission::Confirmed),
                UserStatus::Payment => {
                    // The reservation may have just been expired or confirmed
                    if let Some(expires_at) = self.admission.expires_at(event_id, user_id).await? {
                        return Ok(self.payment(expires_at));
                    }
                    // Or it is gone while the status stayed behind
                    if self.admission.clear_orphaned(event_id, user_id).await? {
                        if let Some(admission) =
                            self.admit_newcomer(event_id, user_id, UserStatus::Expired).await?
                        {
                            return Ok(admission);
                        }
                    }
                }
                UserStatus::None | UserStatus::Expired => {
                    if let Some(admission) = self.admit_newcomer(event_id, user_id, status).await? {
                        return Ok(admission);
                    }
                }
            }

            RequestMetrics::record_conflict();
            if attempt + 1 < attempts {
                let delay = self.settings.retry.jittered_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis(), "Status moved, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(GateError::Contended {
            event_id: event_id.clone(),
            user_id: user_id.clone(),
            attempts,
        })
    }

    /// Grant a slot or queue a user whose status was `observed`. `None` means
    /// the status moved underneath and the caller should re-read it.
    async fn admit_newcomer(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        observed: UserStatus,
    ) -> Result<Option<Admission>> {
        match self.admission.try_admit(event_id, user_id, observed).await? {
            AdmitAttempt::Admitted(reservation) => Ok(Some(self.payment(reservation.expires_at))),
            AdmitAttempt::NoCapacity => {
                let queued = self.waiting.enqueue(event_id, user_id, observed).await?;
                Ok(queued.then_some(Admission::Waiting))
            }
            AdmitAttempt::Conflict => Ok(None),
        }
    }

    /// Confirm payment for the user's reservation, then hand the freed slot
    /// to the head of the waiting list.
    ///
    /// Returns `false` if the user holds no live reservation.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] for unknown ids or store failures. A promotion
    /// failure after a committed confirmation is logged, not returned: the
    /// reconciler retries it.
    pub async fn confirm(&self, event_id: &EventId, user_id: &UserId) -> Result<bool> {
        self.validate(event_id, user_id)?;
        let confirmed = self.admission.confirm(event_id, user_id).await?;
        if confirmed {
            self.promote_after_release(event_id).await;
        }
        Ok(confirmed)
    }

    /// Withdraw from the event: a held slot is released (and offered to the
    /// waiting list), a queued user leaves the queue. The status returns to
    /// `none`.
    ///
    /// Returns `false` if the user held neither.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] for unknown ids or store failures.
    pub async fn cancel(&self, event_id: &EventId, user_id: &UserId) -> Result<bool> {
        self.validate(event_id, user_id)?;
        let canceled = match self.status.get(event_id, user_id).await? {
            UserStatus::Payment => {
                let canceled = self.admission.cancel(event_id, user_id).await?;
                if canceled {
                    self.promote_after_release(event_id).await;
                } else {
                    self.admission.clear_orphaned(event_id, user_id).await?;
                }
                canceled
            }
            UserStatus::Waiting => self.waiting.cancel(event_id, user_id).await?,
            UserStatus::None | UserStatus::Confirmed | UserStatus::Expired => false,
        };
        Ok(canceled)
    }

    /// Where the user stands: status, reservation deadline, queue position.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] for unknown ids or store failures.
    pub async fn status(&self, event_id: &EventId, user_id: &UserId) -> Result<StatusView> {
        self.validate(event_id, user_id)?;
        let status = self.status.get(event_id, user_id).await?;
        let expires_at = match status {
            UserStatus::Payment => self.admission.expires_at(event_id, user_id).await?,
            _ => None,
        };
        let position = match status {
            UserStatus::Waiting => self.waiting.position(event_id, user_id).await?,
            _ => None,
        };
        Ok(StatusView {
            status,
            expires_at,
            position,
        })
    }

    /// Stock and queue counters of one event.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] for an unknown event or store failures.
    pub async fn snapshot(&self, event_id: &EventId) -> Result<EventSnapshot> {
        let total_stock = self
            .directory
            .lookup_event(event_id)
            .ok_or_else(|| GateError::EventNotFound(event_id.clone()))?;
        Ok(EventSnapshot {
            event_id: event_id.clone(),
            total_stock,
            remaining_stock: self.inventory.remaining(event_id).await?,
            active_reservations: self.admission.active_count(event_id).await?,
            waiting: self.waiting.len(event_id).await?,
        })
    }

    /// Store round trip, for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Store`] if the store is unreachable.
    pub async fn health(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }

    /// Gate tunables.
    #[must_use]
    pub const fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Event and user registry.
    #[must_use]
    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    pub(crate) const fn admission(&self) -> &PaymentAdmissionQueue<S> {
        &self.admission
    }

    pub(crate) const fn waiting(&self) -> &WaitingList<S> {
        &self.waiting
    }

    fn validate(&self, event_id: &EventId, user_id: &UserId) -> Result<()> {
        if self.directory.lookup_event(event_id).is_none() {
            return Err(GateError::EventNotFound(event_id.clone()));
        }
        if !self.directory.lookup_user(user_id) {
            return Err(GateError::UserNotFound(user_id.clone()));
        }
        Ok(())
    }

    const fn payment(&self, expires_at: chrono::DateTime<chrono::Utc>) -> Admission {
        Admission::Payment {
            expires_at,
            ttl_seconds: self.settings.ttl_seconds(),
        }
    }

    async fn promote_after_release(&self, event_id: &EventId) {
        if let Err(err) = self.waiting.promote_while_possible(event_id).await {
            warn!(event_id = %event_id, error = %err, "Promotion after release failed");
        }
    }
}
