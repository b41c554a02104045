//! In-memory store for fast, deterministic testing.
//!
//! [`InMemoryStore`] implements the full [`KeyValueStore`] contract with one
//! mutex around the keyspace, so every transaction is trivially atomic. It
//! mirrors the Redis behaviours the gate depends on:
//!
//! - missing counters read as `0`, missing collections as empty
//! - empty lists and sorted sets disappear
//! - writing a key with the wrong type fails with a `WRONGTYPE` error
//!
//! An outage can be simulated with [`InMemoryStore::set_unavailable`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use ticket_gate_core::StoreError;
use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction, TxOutcome};

#[derive(Debug, Clone)]
enum Entry {
    Scalar {
        value: String,
        expires_at: Option<Instant>,
    },
    SortedSet(HashMap<String, i64>),
    List(VecDeque<String>),
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn purge_if_expired(&mut self, key: &str) {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry::Scalar { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.entries.remove(key);
        }
    }

    fn scalar(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Scalar { value, .. }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn counter(&mut self, key: &str) -> Result<i64, StoreError> {
        match self.scalar(key)? {
            None => Ok(0),
            Some(value) => value.parse().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn sorted_set(&self, key: &str) -> Result<Option<&HashMap<String, i64>>, StoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::SortedSet(members)) => Ok(Some(members)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sorted_set_mut(&mut self, key: &str) -> Result<&mut HashMap<String, i64>, StoreError> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()));
        match entry {
            Entry::SortedSet(members) => Ok(members),
            _ => Err(wrong_type(key)),
        }
    }

    fn list(&self, key: &str) -> Result<Option<&VecDeque<String>>, StoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::List(items)) => Ok(Some(items)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<String>, StoreError> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        match entry {
            Entry::List(items) => Ok(items),
            _ => Err(wrong_type(key)),
        }
    }

    /// Drop collections left empty by a mutation.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::SortedSet(members)) => members.is_empty(),
            Some(Entry::List(items)) => items.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn restore(&mut self, snapshot: Vec<(&str, Option<Entry>)>) {
        for (key, entry) in snapshot {
            match entry {
                Some(entry) => {
                    self.entries.insert(key.to_string(), entry);
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
    }

    fn check(&mut self, guard: &Guard) -> Result<bool, StoreError> {
        let holds = match guard {
            Guard::CounterAtLeast { key, min } => self.counter(key)? >= *min,
            Guard::CardinalityBelow { key, limit } => {
                let len = self.sorted_set(key)?.map_or(0, HashMap::len);
                (len as u64) < *limit
            }
            Guard::MemberPresent { key, member } => self
                .sorted_set(key)?
                .is_some_and(|members| members.contains_key(member)),
            Guard::MemberAbsent { key, member } => self
                .sorted_set(key)?
                .is_none_or(|members| !members.contains_key(member)),
            Guard::ScoreAtMost { key, member, max } => self
                .sorted_set(key)?
                .and_then(|members| members.get(member))
                .is_some_and(|score| score <= max),
            Guard::ListEmpty { key } => self.list(key)?.is_none_or(VecDeque::is_empty),
            Guard::ListHeadEquals { key, member } => self
                .list(key)?
                .and_then(VecDeque::front)
                .is_some_and(|head| head == member),
            Guard::ValueEquals { key, expected } => self.scalar(key)? == *expected,
        };
        Ok(holds)
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::Set { key, value, ttl_ms } => {
                self.entries.insert(
                    key.clone(),
                    Entry::Scalar {
                        value: value.clone(),
                        expires_at: ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
                    },
                );
            }
            Mutation::Delete { key } => {
                self.entries.remove(key);
            }
            Mutation::IncrementBy {
                key,
                delta,
                ceiling,
            } => {
                let current = self.counter(key)?;
                let next = current + delta;
                if ceiling.is_none_or(|ceiling| next <= ceiling) {
                    self.entries.insert(
                        key.clone(),
                        Entry::Scalar {
                            value: next.to_string(),
                            expires_at: None,
                        },
                    );
                }
            }
            Mutation::SortedSetAdd { key, member, score } => {
                self.sorted_set_mut(key)?.insert(member.clone(), *score);
            }
            Mutation::SortedSetRemove { key, member } => {
                if self.sorted_set(key)?.is_some() {
                    self.sorted_set_mut(key)?.remove(member);
                    self.drop_if_empty(key);
                }
            }
            Mutation::ListPushBack { key, member } => {
                self.list_mut(key)?.push_back(member.clone());
            }
            Mutation::ListPopFront { key } => {
                if self.list(key)?.is_some() {
                    self.list_mut(key)?.pop_front();
                    self.drop_if_empty(key);
                }
            }
            Mutation::ListRemove { key, member } => {
                if self.list(key)?.is_some() {
                    self.list_mut(key)?.retain(|item| item != member);
                    self.drop_if_empty(key);
                }
            }
        }
        Ok(())
    }
}

/// Thread-safe in-memory implementation of [`KeyValueStore`].
///
/// # Example
///
/// ```
/// use ticket_gate_testing::InMemoryStore;
/// use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// store.set("tickets:stock:1001", "1", None).await?;
///
/// let mut tx = Transaction::new();
/// tx.guard(Guard::CounterAtLeast { key: "tickets:stock:1001".into(), min: 1 });
/// tx.mutate(Mutation::IncrementBy { key: "tickets:stock:1001".into(), delta: -1, ceiling: None });
///
/// assert!(store.execute(&tx).await?.is_committed());
/// assert!(!store.execute(&tx).await?.is_committed()); // stock exhausted
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every call fails with
    /// [`StoreError::Backend`] and nothing is read or written.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of keys currently held (expired scalars included until read).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is marked unavailable.
    pub fn key_count(&self) -> Result<usize, StoreError> {
        self.with_keyspace(|keyspace| Ok(keyspace.entries.len()))
    }

    fn with_keyspace<T>(
        &self,
        f: impl FnOnce(&mut Keyspace) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".into()));
        }
        let mut keyspace = self
            .keyspace
            .lock()
            .map_err(|_| StoreError::Backend("Mutex lock failed".into()))?;
        f(&mut keyspace)
    }
}

impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_keyspace(|keyspace| keyspace.scalar(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: Option<u64>) -> Result<(), StoreError> {
        let mutation = Mutation::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms,
        };
        self.with_keyspace(|keyspace| keyspace.apply(&mutation))
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mutation = Mutation::IncrementBy {
            key: key.to_string(),
            delta,
            ceiling: None,
        };
        self.with_keyspace(|keyspace| {
            keyspace.apply(&mutation)?;
            keyspace.counter(key)
        })
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, StoreError> {
        self.with_keyspace(|keyspace| {
            Ok(keyspace.sorted_set(key)?.map_or(0, |members| members.len() as u64))
        })
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        self.with_keyspace(|keyspace| {
            Ok(keyspace
                .sorted_set(key)?
                .and_then(|members| members.get(member).copied()))
        })
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        self.with_keyspace(|keyspace| {
            let Some(members) = keyspace.sorted_set(key)? else {
                return Ok(Vec::new());
            };
            let mut due: Vec<(String, i64)> = members
                .iter()
                .filter(|(_, score)| **score <= max)
                .map(|(member, score)| (member.clone(), *score))
                .collect();
            // Redis orders equal scores lexicographically
            due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            due.truncate(limit);
            Ok(due)
        })
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.with_keyspace(|keyspace| {
            let Some(items) = keyspace.list(key)? else {
                return Ok(Vec::new());
            };
            let len = items.len() as isize;
            let start = if start < 0 { len + start } else { start }.max(0);
            let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
            if start > stop {
                return Ok(Vec::new());
            }
            #[allow(clippy::cast_sign_loss)] // both bounds are clamped to 0..len
            let range = start as usize..=stop as usize;
            Ok(items.range(range).cloned().collect())
        })
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        self.with_keyspace(|keyspace| Ok(keyspace.list(key)?.map_or(0, |items| items.len() as u64)))
    }

    async fn execute(&self, tx: &Transaction) -> Result<TxOutcome, StoreError> {
        self.with_keyspace(|keyspace| {
            for (index, guard) in tx.guards().iter().enumerate() {
                if !keyspace.check(guard)? {
                    return Ok(TxOutcome::Rejected { guard: index });
                }
            }

            // Roll back on a mid-batch failure so the batch stays all-or-nothing
            let before: Vec<(&str, Option<Entry>)> = tx
                .keys()
                .into_iter()
                .map(|key| (key, keyspace.entries.get(key).cloned()))
                .collect();
            for mutation in tx.mutations() {
                if let Err(err) = keyspace.apply(mutation) {
                    keyspace.restore(before);
                    return Err(err);
                }
            }
            Ok(TxOutcome::Committed)
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_keyspace(|_| Ok(()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decrement(key: &str) -> Mutation {
        Mutation::IncrementBy {
            key: key.to_string(),
            delta: -1,
            ceiling: None,
        }
    }

    #[tokio::test]
    async fn test_rejected_guard_writes_nothing() {
        let store = InMemoryStore::new();
        store.set("stock", "1", None).await.unwrap();

        let mut tx = Transaction::new();
        tx.guard(Guard::CounterAtLeast {
            key: "stock".into(),
            min: 1,
        });
        let list_guard = tx.guard(Guard::ListEmpty {
            key: "waiting".into(),
        });
        tx.mutate(decrement("stock"));

        let push = Mutation::ListPushBack {
            key: "waiting".into(),
            member: "u1".into(),
        };
        let mut seed = Transaction::new();
        seed.mutate(push);
        store.execute(&seed).await.unwrap();

        let outcome = store.execute(&tx).await.unwrap();
        assert!(outcome.rejected_by(list_guard));
        assert_eq!(store.get("stock").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back_batch() {
        let store = InMemoryStore::new();
        store.set("status", "waiting", None).await.unwrap();

        let mut tx = Transaction::new();
        tx.mutate(decrement("stock")).mutate(Mutation::ListPushBack {
            key: "status".into(),
            member: "u1".into(),
        });

        assert!(store.execute(&tx).await.is_err());
        assert_eq!(store.get("stock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rollback_restores_only_touched_keys() {
        let store = InMemoryStore::new();
        store.set("stock", "3", None).await.unwrap();
        store.set("status", "waiting", None).await.unwrap();
        store.set("other", "kept", None).await.unwrap();

        let mut tx = Transaction::new();
        tx.mutate(decrement("stock"))
            .mutate(Mutation::SortedSetAdd {
                key: "payment".into(),
                member: "u1".into(),
                score: 1,
            })
            .mutate(Mutation::ListPushBack {
                key: "status".into(),
                member: "u1".into(),
            });

        assert!(store.execute(&tx).await.is_err());
        assert_eq!(store.get("stock").await.unwrap().as_deref(), Some("3"));
        assert_eq!(store.sorted_set_card("payment").await.unwrap(), 0);
        assert_eq!(store.get("status").await.unwrap().as_deref(), Some("waiting"));
        assert_eq!(store.get("other").await.unwrap().as_deref(), Some("kept"));
        assert_eq!(store.key_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_member_absent_guard() {
        let store = InMemoryStore::new();
        let mut add = Transaction::new();
        add.guard(Guard::MemberAbsent {
            key: "payment".into(),
            member: "u1".into(),
        });
        add.mutate(Mutation::SortedSetAdd {
            key: "payment".into(),
            member: "u1".into(),
            score: 1,
        });

        assert!(store.execute(&add).await.unwrap().is_committed());
        assert!(!store.execute(&add).await.unwrap().is_committed());
    }

    #[tokio::test]
    async fn test_increment_ceiling_skips_overflow() {
        let store = InMemoryStore::new();
        store.set("stock", "2", None).await.unwrap();

        let mut tx = Transaction::new();
        tx.mutate(Mutation::IncrementBy {
            key: "stock".into(),
            delta: 1,
            ceiling: Some(2),
        });
        assert!(store.execute(&tx).await.unwrap().is_committed());
        assert_eq!(store.get("stock").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_sorted_set_queries() {
        let store = InMemoryStore::new();
        let mut tx = Transaction::new();
        for (member, score) in [("c", 30), ("a", 10), ("b", 10), ("d", 40)] {
            tx.mutate(Mutation::SortedSetAdd {
                key: "payment".into(),
                member: member.into(),
                score,
            });
        }
        store.execute(&tx).await.unwrap();

        assert_eq!(store.sorted_set_card("payment").await.unwrap(), 4);
        assert_eq!(
            store.sorted_set_score("payment", "c").await.unwrap(),
            Some(30)
        );
        let due = store
            .sorted_set_range_by_score("payment", 30, 10)
            .await
            .unwrap();
        assert_eq!(
            due,
            vec![("a".into(), 10), ("b".into(), 10), ("c".into(), 30)]
        );
        let limited = store
            .sorted_set_range_by_score("payment", 30, 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_list_behaves_like_redis() {
        let store = InMemoryStore::new();
        let mut tx = Transaction::new();
        for member in ["u1", "u2", "u3"] {
            tx.mutate(Mutation::ListPushBack {
                key: "waiting".into(),
                member: member.into(),
            });
        }
        store.execute(&tx).await.unwrap();

        assert_eq!(store.list_range("waiting", 0, 0).await.unwrap(), vec!["u1"]);
        assert_eq!(store.list_range("waiting", -2, -1).await.unwrap(), vec!["u2", "u3"]);
        assert!(store.list_range("waiting", 5, 9).await.unwrap().is_empty());

        let mut pop = Transaction::new();
        pop.mutate(Mutation::ListPopFront {
            key: "waiting".into(),
        })
        .mutate(Mutation::ListRemove {
            key: "waiting".into(),
            member: "u3".into(),
        });
        store.execute(&pop).await.unwrap();
        assert_eq!(store.list_range("waiting", 0, -1).await.unwrap(), vec!["u2"]);

        let mut drain = Transaction::new();
        drain.mutate(Mutation::ListPopFront {
            key: "waiting".into(),
        });
        store.execute(&drain).await.unwrap();
        assert_eq!(store.list_len("waiting").await.unwrap(), 0);
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_value_equals_treats_missing_as_none() {
        let store = InMemoryStore::new();
        let mut tx = Transaction::new();
        tx.guard(Guard::ValueEquals {
            key: "status".into(),
            expected: None,
        });
        tx.mutate(Mutation::Set {
            key: "status".into(),
            value: "waiting".into(),
            ttl_ms: None,
        });

        assert!(store.execute(&tx).await.unwrap().is_committed());
        assert!(!store.execute(&tx).await.unwrap().is_committed());
    }

    #[tokio::test]
    async fn test_scalar_ttl_expires_record() {
        let store = InMemoryStore::new();
        store.set("status", "payment", Some(20)).await.unwrap();
        assert!(store.get("status").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
        assert!(store.get("anything").await.is_err());

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_non_numeric_counter_is_corrupt() {
        let store = InMemoryStore::new();
        store.set("stock", "lots", None).await.unwrap();
        let err = store.increment_by("stock", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
