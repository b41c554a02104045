//! # Ticket Gate Redis
//!
//! Redis implementation of [`KeyValueStore`].
//!
//! # Architecture
//!
//! - Reads are single commands (`GET`, `ZCARD`, `ZSCORE`, `ZRANGEBYSCORE`,
//!   `LRANGE`, `LLEN`)
//! - Every guarded [`Transaction`] runs as one Lua script (see `script.rs`),
//!   so guards and mutations are evaluated without interleaving
//! - Connections are owned by a [`ConnectionManager`], which reconnects on
//!   failure and is cheap to clone
//! - Every call is bounded by a timeout and surfaces as
//!   [`StoreError::Timeout`] when it elapses
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ticket_gate_redis::RedisStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisStore::new("redis://127.0.0.1:6379", Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

mod script;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use std::future::Future;
use std::time::Duration;
use ticket_gate_core::StoreError;
use ticket_gate_core::store::{KeyValueStore, Transaction, TxOutcome};

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Upper bound on every call.
    timeout: Duration,
    /// Guarded transaction script, loaded lazily via `EVALSHA`.
    script: Script,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., `redis://127.0.0.1:6379`)
    /// * `timeout` - Upper bound applied to every subsequent call
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is invalid or the first
    /// connection fails, [`StoreError::Timeout`] if it does not complete in time.
    pub async fn new(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(|e| {
                StoreError::Backend(format!("Failed to create Redis connection manager: {e}"))
            })?;

        tracing::info!(timeout_ms = timeout.as_millis(), "Connected to Redis");

        Ok(Self {
            conn_manager,
            timeout,
            script: Script::new(script::GUARDED_TRANSACTION),
        })
    }

    /// Run one Redis call under the configured timeout.
    async fn bounded<T>(
        &self,
        command: &'static str,
        call: impl Future<Output = RedisResult<T>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(command, error = %e, "Redis call failed");
                Err(StoreError::Backend(format!("{command}: {e}")))
            }
            Err(_) => {
                tracing::warn!(command, timeout_ms = self.timeout.as_millis(), "Redis call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

/// Scores are whole milliseconds stored as doubles.
#[allow(clippy::cast_possible_truncation)]
fn score_to_millis(score: f64) -> i64 {
    score as i64
}

impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("GET", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: Option<u64>) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("SET", async move {
            match ttl_ms {
                Some(ms) => conn.pset_ex(key, value, ms).await,
                None => conn.set(key, value).await,
            }
        })
        .await
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("INCRBY", async move { conn.incr(key, delta).await })
            .await
    }

    async fn sorted_set_card(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("ZCARD", async move { conn.zcard(key).await }).await
    }

    async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let score: Option<f64> = self
            .bounded("ZSCORE", async move { conn.zscore(key, member).await })
            .await?;
        Ok(score.map(score_to_millis))
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let count = isize::try_from(limit).unwrap_or(isize::MAX);
        let mut conn = self.conn_manager.clone();
        let members: Vec<(String, f64)> = self
            .bounded("ZRANGEBYSCORE", async move {
                conn.zrangebyscore_limit_withscores(key, "-inf", max, 0, count)
                    .await
            })
            .await?;
        Ok(members
            .into_iter()
            .map(|(member, score)| (member, score_to_millis(score)))
            .collect())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("LRANGE", async move { conn.lrange(key, start, stop).await })
            .await
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("LLEN", async move { conn.llen(key).await }).await
    }

    async fn execute(&self, tx: &Transaction) -> Result<TxOutcome, StoreError> {
        let plan = serde_json::to_string(tx)
            .map_err(|e| StoreError::Backend(format!("Failed to encode transaction: {e}")))?;

        let mut invocation = self.script.prepare_invoke();
        for key in tx.keys() {
            invocation.key(key);
        }
        invocation.arg(plan);

        let mut conn = self.conn_manager.clone();
        let code: i64 = self
            .bounded("EVALSHA", async move { invocation.invoke_async(&mut conn).await })
            .await?;

        match usize::try_from(code) {
            Ok(0) => Ok(TxOutcome::Committed),
            Ok(failed) if failed <= tx.guards().len() => {
                tracing::debug!(guard = failed - 1, "Transaction rejected by guard");
                Ok(TxOutcome::Rejected { guard: failed - 1 })
            }
            _ => Err(StoreError::Backend(format!(
                "Unexpected transaction script reply: {code}"
            ))),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let pong: String = self
            .bounded("PING", async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("Unexpected PING reply: {pong}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_conversion_keeps_millis() {
        assert_eq!(score_to_millis(1_735_689_900_123.0), 1_735_689_900_123);
    }

    #[test]
    fn test_script_handles_every_kind() {
        for kind in [
            "counter_at_least",
            "cardinality_below",
            "member_present",
            "member_absent",
            "score_at_most",
            "list_empty",
            "list_head_equals",
            "value_equals",
            "set",
            "delete",
            "increment_by",
            "sorted_set_add",
            "sorted_set_remove",
            "list_push_back",
            "list_pop_front",
            "list_remove",
        ] {
            assert!(
                script::GUARDED_TRANSACTION.contains(kind),
                "script does not handle {kind}"
            );
        }
    }
}
