//! # Ticket Gate Runtime
//!
//! The admission engine of the ticket gate.
//!
//! Every component is generic over a [`KeyValueStore`] and keeps no domain
//! state of its own: all shared state lives in the store and every multi-step
//! change is one guarded transaction, so any number of gate instances and
//! reconcilers can run against the same store.
//!
//! ## Core Components
//!
//! - **Inventory** ([`inventory`]): per-event stock counters
//! - **Status tracker** ([`status`]): per-(event, user) status records
//! - **Admission queue** ([`admission`]): bounded, time-limited payment slots
//! - **Waiting list** ([`waiting`]): FIFO overflow with head-only promotion
//! - **Gate** ([`gate`]): `request_ticket` and the other caller-facing operations
//! - **Reconciler** ([`reconciler`]): background expiry and promotion
//!
//! ## Example
//!
//! ```ignore
//! let gate = TicketGate::new(store, KeySpace::new(), directory, Arc::new(SystemClock), settings);
//! gate.seed_stock().await?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let reconciler = ExpiryReconciler::new(gate.clone(), shutdown_rx).spawn();
//!
//! match gate.request_ticket(&event_id, &user_id).await? {
//!     Admission::Payment { expires_at, .. } => { /* pay before expires_at */ }
//!     Admission::Waiting => { /* poll status */ }
//!     Admission::Confirmed => { /* already done */ }
//! }
//! ```
//!
//! [`KeyValueStore`]: ticket_gate_core::store::KeyValueStore

pub mod admission;
pub mod gate;
pub mod inventory;
pub mod reconciler;
pub mod status;
pub mod waiting;

/// Backoff for optimistic retries and startup work
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Gate tunables
pub mod settings;

pub use admission::{AdmitAttempt, PaymentAdmissionQueue};
pub use gate::TicketGate;
pub use inventory::TicketInventory;
pub use reconciler::{CycleReport, EventReport, ExpiryReconciler};
pub use settings::GateSettings;
pub use status::UserStatusTracker;
pub use waiting::{Promotion, WaitingList};
