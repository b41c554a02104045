//! Domain types for the admission gate.
//!
//! This module defines strong identifier types (`EventId`, `UserId`), the
//! per-user state machine (`UserStatus`), and the values returned to callers
//! (`Reservation`, `Admission`, `StatusView`, `EventSnapshot`).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind} identifier: {value:?}")]
pub struct ParseIdError {
    kind: &'static str,
    value: String,
}

/// Identifiers end up inside store keys, so the key separator is rejected.
fn validate_id(kind: &'static str, value: &str) -> Result<(), ParseIdError> {
    if value.is_empty() || value.contains(':') || value.chars().any(char::is_whitespace) {
        return Err(ParseIdError {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Identifier of a ticketed event (e.g. `"1001"`).
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings, whitespace and `:`
/// - `new()`: no validation (for trusted, application-controlled input)
///
/// # Examples
///
/// ```
/// use ticket_gate_core::types::EventId;
///
/// let id: EventId = "1001".parse().unwrap();
/// assert_eq!(id.as_str(), "1001");
/// assert!("bad:id".parse::<EventId>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Create a new `EventId` without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_id("event", s)?;
        Ok(Self(s.to_string()))
    }
}

/// Identifier of a requesting user (e.g. `"u1"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new `UserId` without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_id("user", s)?;
        Ok(Self(s.to_string()))
    }
}

/// Observable state of one (event, user) pair.
///
/// `None` is never written to the store: it is the absence of a status record.
///
/// ```text
/// None ──admit──▶ Payment ──confirm──▶ Confirmed
///   │               │
///   │               └──ttl elapsed──▶ Expired ──request──▶ Payment | Waiting
///   └──full──▶ Waiting ──promote──▶ Payment
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// No record for this pair.
    #[default]
    None,
    /// Queued on the waiting list.
    Waiting,
    /// Holding a payment slot.
    Payment,
    /// Payment confirmed; the stock unit is consumed.
    Confirmed,
    /// The payment window lapsed and the unit was returned.
    Expired,
}

impl UserStatus {
    /// Stored representation, `None` for the absent record.
    #[must_use]
    pub const fn as_stored(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Waiting => Some("waiting"),
            Self::Payment => Some("payment"),
            Self::Confirmed => Some("confirmed"),
            Self::Expired => Some("expired"),
        }
    }

    /// Parse a stored value. Absent records map to `UserStatus::None`.
    ///
    /// Returns `None` for unrecognised values.
    #[must_use]
    pub fn from_stored(value: Option<&str>) -> Option<Self> {
        match value {
            None => Some(Self::None),
            Some("waiting") => Some(Self::Waiting),
            Some("payment") => Some(Self::Payment),
            Some("confirmed") => Some(Self::Confirmed),
            Some("expired") => Some(Self::Expired),
            Some(_) => None,
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_stored().unwrap_or("none"))
    }
}

/// Convert epoch milliseconds (the reservation score) to a timestamp.
#[must_use]
pub fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// An admitted, not yet confirmed, not yet expired payment slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Event the slot belongs to.
    pub event_id: EventId,
    /// Holder of the slot.
    pub user_id: UserId,
    /// Deadline for confirmation.
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Build a reservation from its sorted-set score.
    #[must_use]
    pub fn from_score(event_id: EventId, user_id: UserId, score: i64) -> Self {
        Self {
            event_id,
            user_id,
            expires_at: timestamp_from_millis(score),
        }
    }

    /// Sorted-set score of this reservation (epoch milliseconds).
    #[must_use]
    pub fn score(&self) -> i64 {
        self.expires_at.timestamp_millis()
    }
}

/// Result of a ticket request.
///
/// Serializes with a `status` tag:
///
/// ```json
/// {"status": "payment", "expires_at": "2025-01-01T00:05:00Z", "ttl_seconds": 300}
/// {"status": "waiting"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    /// The user holds a payment slot until `expires_at`.
    Payment {
        /// Deadline for confirmation.
        expires_at: DateTime<Utc>,
        /// Configured length of the payment window.
        ttl_seconds: u64,
    },
    /// The user is queued on the waiting list.
    Waiting,
    /// The user already confirmed a ticket for this event.
    Confirmed,
}

impl Admission {
    /// The user status this admission corresponds to.
    #[must_use]
    pub const fn status(&self) -> UserStatus {
        match self {
            Self::Payment { .. } => UserStatus::Payment,
            Self::Waiting => UserStatus::Waiting,
            Self::Confirmed => UserStatus::Confirmed,
        }
    }
}

/// Detailed view of one (event, user) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Current status.
    pub status: UserStatus,
    /// Reservation deadline while in `payment`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Zero-based queue position while in `waiting`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

/// Point-in-time counters for one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Event identifier.
    pub event_id: EventId,
    /// Stock the event was created with.
    pub total_stock: u32,
    /// Units neither reserved nor consumed.
    pub remaining_stock: i64,
    /// Reservations currently holding a payment slot.
    pub active_reservations: u64,
    /// Users queued on the waiting list.
    pub waiting: u64,
}
