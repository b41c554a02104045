//! Store adapter contract.
//!
//! All shared admission state lives in an external key-value store that offers
//! scalar values, counters, sorted sets and lists. Correctness depends entirely
//! on that store's atomicity: every multi-step change is expressed as one
//! [`Transaction`], a batch of [`Mutation`]s applied all-or-nothing and only if
//! every [`Guard`] holds at execution time.
//!
//! # Implementations
//!
//! - `RedisStore` (in `ticket-gate-redis`): a server-side Lua script evaluates
//!   the guards and applies the batch in one step
//! - `InMemoryStore` (in `ticket-gate-testing`): one mutex around the whole
//!   keyspace, for fast deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction, TxOutcome};
//! use ticket_gate_core::error::StoreError;
//!
//! async fn take_unit<S: KeyValueStore>(store: &S) -> Result<bool, StoreError> {
//!     let mut tx = Transaction::new();
//!     tx.guard(Guard::CounterAtLeast { key: "tickets:stock:1001".into(), min: 1 });
//!     tx.mutate(Mutation::IncrementBy {
//!         key: "tickets:stock:1001".into(),
//!         delta: -1,
//!         ceiling: None,
//!     });
//!     Ok(store.execute(&tx).await?.is_committed())
//! }
//! ```

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// A precondition evaluated atomically before a transaction's mutations.
///
/// Missing keys behave like empty values: a missing counter reads as `0`, a
/// missing sorted set or list is empty, and a missing scalar is `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guard {
    /// Counter at `key` is at least `min`.
    CounterAtLeast {
        /// Counter key.
        key: String,
        /// Inclusive lower bound.
        min: i64,
    },
    /// Sorted set at `key` holds fewer than `limit` members.
    CardinalityBelow {
        /// Sorted set key.
        key: String,
        /// Exclusive upper bound.
        limit: u64,
    },
    /// `member` is present in the sorted set at `key`.
    MemberPresent {
        /// Sorted set key.
        key: String,
        /// Member to look for.
        member: String,
    },
    /// `member` is not in the sorted set at `key`.
    MemberAbsent {
        /// Sorted set key.
        key: String,
        /// Member that must be missing.
        member: String,
    },
    /// `member` is present in the sorted set at `key` with a score `<= max`.
    ScoreAtMost {
        /// Sorted set key.
        key: String,
        /// Member to look for.
        member: String,
        /// Inclusive score bound.
        max: i64,
    },
    /// List at `key` is empty.
    ListEmpty {
        /// List key.
        key: String,
    },
    /// First element of the list at `key` equals `member`.
    ListHeadEquals {
        /// List key.
        key: String,
        /// Expected head.
        member: String,
    },
    /// Scalar at `key` equals `expected` (`None` means the key is absent).
    ValueEquals {
        /// Scalar key.
        key: String,
        /// Expected value.
        #[serde(skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
    },
}

/// A write applied as part of a committed transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Set a scalar, optionally expiring after `ttl_ms` milliseconds.
    Set {
        /// Scalar key.
        key: String,
        /// New value.
        value: String,
        /// Expiry of the record itself, `None` for no expiry.
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_ms: Option<u64>,
    },
    /// Remove a key of any type.
    Delete {
        /// Key to remove.
        key: String,
    },
    /// Add `delta` to a counter (missing counters start at `0`).
    ///
    /// With a `ceiling`, an increment that would push the counter above it is
    /// skipped instead of applied.
    IncrementBy {
        /// Counter key.
        key: String,
        /// Signed amount.
        delta: i64,
        /// Optional inclusive upper bound.
        #[serde(skip_serializing_if = "Option::is_none")]
        ceiling: Option<i64>,
    },
    /// Add or re-score a sorted set member.
    SortedSetAdd {
        /// Sorted set key.
        key: String,
        /// Member.
        member: String,
        /// Score (epoch milliseconds for reservations).
        score: i64,
    },
    /// Remove a sorted set member.
    SortedSetRemove {
        /// Sorted set key.
        key: String,
        /// Member.
        member: String,
    },
    /// Append to the tail of a list.
    ListPushBack {
        /// List key.
        key: String,
        /// Element.
        member: String,
    },
    /// Remove the head of a list.
    ListPopFront {
        /// List key.
        key: String,
    },
    /// Remove every occurrence of `member` from a list.
    ListRemove {
        /// List key.
        key: String,
        /// Element.
        member: String,
    },
}

/// A guarded, all-or-nothing batch of mutations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    guards: Vec<Guard>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    /// Create an empty transaction.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            guards: Vec::new(),
            mutations: Vec::new(),
        }
    }

    /// Add a guard and return its index, as reported by [`TxOutcome::Rejected`].
    pub fn guard(&mut self, guard: Guard) -> usize {
        self.guards.push(guard);
        self.guards.len() - 1
    }

    /// Add a mutation.
    pub fn mutate(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    /// Guards in evaluation order.
    #[must_use]
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Mutations in application order.
    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Every key the transaction touches, deduplicated, in first-use order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        let guard_keys = self.guards.iter().map(Guard::key);
        let mutation_keys = self.mutations.iter().map(Mutation::key);
        for key in guard_keys.chain(mutation_keys) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

impl Guard {
    /// Key this guard reads.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::CounterAtLeast { key, .. }
            | Self::CardinalityBelow { key, .. }
            | Self::MemberPresent { key, .. }
            | Self::MemberAbsent { key, .. }
            | Self::ScoreAtMost { key, .. }
            | Self::ListEmpty { key }
            | Self::ListHeadEquals { key, .. }
            | Self::ValueEquals { key, .. } => key,
        }
    }
}

impl Mutation {
    /// Key this mutation writes.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. }
            | Self::Delete { key }
            | Self::IncrementBy { key, .. }
            | Self::SortedSetAdd { key, .. }
            | Self::SortedSetRemove { key, .. }
            | Self::ListPushBack { key, .. }
            | Self::ListPopFront { key }
            | Self::ListRemove { key, .. } => key,
        }
    }
}

/// Result of executing a [`Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    /// Every guard held and every mutation was applied.
    Committed,
    /// The guard at this index failed; nothing was written.
    Rejected {
        /// Index returned by [`Transaction::guard`].
        guard: usize,
    },
}

impl TxOutcome {
    /// Whether the transaction was applied.
    #[must_use]
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Whether the guard at `index` is the one that failed.
    #[must_use]
    pub const fn rejected_by(self, index: usize) -> bool {
        matches!(self, Self::Rejected { guard } if guard == index)
    }
}

/// Atomic key-value / sorted-set / list store.
///
/// Reads are single commands. Writes that must stay consistent with other
/// keys go through [`KeyValueStore::execute`].
///
/// # Thread Safety
///
/// Implementations are cheap to clone (a connection manager or an `Arc`) and
/// shared across request handlers and the reconciler.
pub trait KeyValueStore: Clone + Send + Sync + 'static {
    /// Read a scalar.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Write a scalar unconditionally, optionally with an expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Add `delta` to a counter and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable, times out, or the
    /// key holds a non-numeric value.
    fn increment_by(
        &self,
        key: &str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Number of members in a sorted set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn sorted_set_card(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Score of one sorted set member.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn sorted_set_score(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Members with `score <= max`, lowest score first, at most `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn sorted_set_range_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, i64)>, StoreError>> + Send;

    /// List elements from `start` to `stop` inclusive (negative indices count
    /// from the tail, as in Redis `LRANGE`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Length of a list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn list_len(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Execute a guarded transaction atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out. A
    /// failed guard is not an error: it is reported as [`TxOutcome::Rejected`].
    fn execute(
        &self,
        tx: &Transaction,
    ) -> impl Future<Output = Result<TxOutcome, StoreError>> + Send;

    /// Round-trip check used by readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or times out.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
