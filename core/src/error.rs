//! Error types for store and gate operations.
//!
//! Capacity exhaustion and lost admission races are deliberately absent: both
//! degrade to a waiting-list enqueue and are never surfaced as errors.

use crate::types::{EventId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Failures of the backing store.
///
/// Every store failure is transient from the caller's point of view: no
/// partial state is committed because every multi-key write is one
/// transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call did not complete within the configured timeout.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend reported an error (connection refused, script error, ...).
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A key held a value of the wrong shape.
    #[error("Malformed value at {key}: {value:?}")]
    Corrupt {
        /// Offending key.
        key: String,
        /// Raw value found.
        value: String,
    },
}

/// Coarse classification used by outer layers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown event or user. Terminal, not retryable.
    NotFound,
    /// The store could not complete the request. Retryable by the caller.
    Unavailable,
    /// Invalid configuration or data. Not retryable.
    Invalid,
}

/// Errors surfaced by the admission gate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The event is not in the catalog.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// The user is not in the directory.
    #[error("User {0} not found")]
    UserNotFound(UserId),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Optimistic retries on the user's own status were exhausted.
    #[error("Request for event {event_id} by {user_id} contended after {attempts} attempts")]
    Contended {
        /// Event requested.
        event_id: EventId,
        /// Requesting user.
        user_id: UserId,
        /// Attempts made.
        attempts: usize,
    },

    /// Configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GateError {
    /// Classify this error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ticket_gate_core::error::{ErrorKind, GateError, StoreError};
    /// # use ticket_gate_core::types::EventId;
    /// assert_eq!(GateError::EventNotFound(EventId::new("9")).kind(), ErrorKind::NotFound);
    /// assert_eq!(
    ///     GateError::Store(StoreError::Backend("down".into())).kind(),
    ///     ErrorKind::Unavailable
    /// );
    /// ```
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EventNotFound(_) | Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::Store(StoreError::Corrupt { .. }) | Self::Config(_) => ErrorKind::Invalid,
            Self::Store(_) | Self::Contended { .. } => ErrorKind::Unavailable,
        }
    }

    /// Returns `true` if the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable)
    }
}
