//! Configuration management for the ticket gate server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unset variables take their default; set but malformed ones are rejected
//! rather than silently replaced.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use ticket_gate_core::catalog::StaticDirectory;
use ticket_gate_core::error::GateError;
use ticket_gate_core::keys::KeySpace;
use ticket_gate_runtime::GateSettings;
use ticket_gate_runtime::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Admission tunables
    pub gate: GateConfig,
    /// Backing store
    pub store: StoreConfig,
    /// HTTP server
    pub server: ServerConfig,
    /// Events and users known to the gate
    pub catalog: CatalogConfig,
}

/// Admission tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Maximum concurrent reservations per event (`MAX_PAYMENT_SLOTS`)
    pub max_payment_slots: u64,
    /// Payment window in seconds (`PAYMENT_TTL_SECS`)
    pub payment_ttl_secs: u64,
    /// Reconciler period in seconds (`RECONCILE_INTERVAL_SECS`)
    pub reconcile_interval_secs: u64,
    /// Overdue reservations handled per event per cycle (`RECONCILE_BATCH_SIZE`)
    pub reconcile_batch_size: usize,
    /// Optimistic retries on a user's own status (`ADMISSION_RETRIES`)
    pub admission_retries: usize,
}

/// Which store implementation backs the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server; required for more than one instance.
    Redis,
    /// Process-local store, for development and demos.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err("expected redis or memory".to_string()),
        }
    }
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation (`STORE_BACKEND`)
    pub backend: StoreBackend,
    /// Redis connection URL (`REDIS_URL`)
    pub redis_url: String,
    /// Upper bound on every store call in milliseconds (`STORE_TIMEOUT_MS`)
    pub timeout_ms: u64,
    /// Namespace prepended to every key (`KEY_PREFIX`)
    pub key_prefix: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (`HOST`)
    pub host: String,
    /// Port to bind to (`PORT`)
    pub port: u16,
    /// Graceful shutdown timeout in seconds (`SHUTDOWN_TIMEOUT_SECS`)
    pub shutdown_timeout: u64,
}

/// Static registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// `event:stock` pairs, comma-separated (`EVENTS`)
    pub events: String,
    /// User ids, comma-separated (`USERS`)
    pub users: String,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if a variable is set to a value that
    /// does not parse.
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if a variable is set to a value that
    /// does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GateError> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            gate: GateConfig {
                max_payment_slots: parsed(&lookup, "MAX_PAYMENT_SLOTS", 1000)?,
                payment_ttl_secs: parsed(&lookup, "PAYMENT_TTL_SECS", 300)?,
                reconcile_interval_secs: parsed(&lookup, "RECONCILE_INTERVAL_SECS", 5)?,
                reconcile_batch_size: parsed(&lookup, "RECONCILE_BATCH_SIZE", 500)?,
                admission_retries: parsed(&lookup, "ADMISSION_RETRIES", 3)?,
            },
            store: StoreConfig {
                backend: parsed(&lookup, "STORE_BACKEND", StoreBackend::Redis)?,
                redis_url: text("REDIS_URL", "redis://localhost:6379"),
                timeout_ms: parsed(&lookup, "STORE_TIMEOUT_MS", 2000)?,
                key_prefix: text("KEY_PREFIX", ""),
            },
            server: ServerConfig {
                host: text("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT", 8000)?,
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?,
            },
            catalog: CatalogConfig {
                events: text("EVENTS", "1001:1,2002:20"),
                users: text("USERS", "u1,u2,u3,u4,u5"),
            },
        })
    }

    /// Gate tunables derived from this configuration.
    #[must_use]
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            max_payment_slots: self.gate.max_payment_slots,
            payment_ttl: Duration::from_secs(self.gate.payment_ttl_secs),
            reconcile_interval: Duration::from_secs(self.gate.reconcile_interval_secs),
            reconcile_batch: self.gate.reconcile_batch_size,
            retry: RetryPolicy::builder()
                .max_retries(self.gate.admission_retries)
                .build(),
        }
    }

    /// Event and user registries.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] on a malformed `EVENTS` or `USERS` list.
    pub fn directory(&self) -> Result<StaticDirectory, GateError> {
        StaticDirectory::parse(&self.catalog.events, &self.catalog.users)
    }

    /// Key layout, namespaced by `KEY_PREFIX` when set.
    #[must_use]
    pub fn keyspace(&self) -> KeySpace {
        KeySpace::with_namespace(&self.store.key_prefix)
    }

    /// Store call timeout.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    /// Graceful shutdown budget for background tasks.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    /// `host:port` to bind the HTTP listener to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parsed<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, GateError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| GateError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use ticket_gate_core::catalog::Directory;
    use ticket_gate_core::types::EventId;

    fn config(vars: &[(&str, &str)]) -> Result<Config, GateError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.gate.max_payment_slots, 1000);
        assert_eq!(config.gate.payment_ttl_secs, 300);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://localhost:6379");
        assert_eq!(config.store_timeout(), Duration::from_secs(2));
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));

        let directory = config.directory().unwrap();
        assert_eq!(directory.lookup_event(&EventId::new("1001")), Some(1));
        assert_eq!(directory.lookup_event(&EventId::new("2002")), Some(20));
    }

    #[test]
    fn test_overrides_reach_gate_settings() {
        let config = config(&[
            ("MAX_PAYMENT_SLOTS", "2"),
            ("PAYMENT_TTL_SECS", "60"),
            ("RECONCILE_INTERVAL_SECS", "1"),
            ("RECONCILE_BATCH_SIZE", "10"),
            ("ADMISSION_RETRIES", "5"),
            ("STORE_BACKEND", "Memory"),
            ("PORT", "9000"),
        ])
        .unwrap();

        let settings = config.gate_settings();
        assert_eq!(settings.max_payment_slots, 2);
        assert_eq!(settings.payment_ttl, Duration::from_secs(60));
        assert_eq!(settings.reconcile_interval, Duration::from_secs(1));
        assert_eq!(settings.reconcile_batch, 10);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = config(&[("MAX_PAYMENT_SLOTS", "lots")]).unwrap_err();
        assert!(matches!(err, GateError::Config(msg) if msg.contains("MAX_PAYMENT_SLOTS")));

        assert!(config(&[("PORT", "70000")]).is_err());
        assert!(config(&[("STORE_BACKEND", "postgres")]).is_err());
    }

    #[test]
    fn test_key_prefix_namespaces_keys() {
        let plain = config(&[]).unwrap().keyspace();
        let prefixed = config(&[("KEY_PREFIX", "staging")]).unwrap().keyspace();
        let event = EventId::new("1001");
        assert_ne!(plain.stock(&event), prefixed.stock(&event));
        assert!(prefixed.stock(&event).starts_with("staging"));
    }

    #[test]
    fn test_bad_catalog_is_a_config_error() {
        let config = config(&[("EVENTS", "1001:many")]).unwrap();
        assert!(matches!(config.directory(), Err(GateError::Config(_))));
    }
}
