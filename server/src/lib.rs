//! # Ticket Gate Server
//!
//! Wires the admission gate into a running process:
//!
//! 1. **Startup**: build the store, seed missing stock counters (with
//!    backoff while the store comes up), install the metrics recorder
//! 2. **Runtime**: serve HTTP and run the expiry reconciler in the background
//! 3. **Shutdown**: stop accepting connections, broadcast the shutdown signal,
//!    give the reconciler `SHUTDOWN_TIMEOUT_SECS` to finish its cycle
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! ticket_gate_server::run(config).await?;
//! ```

#![forbid(unsafe_code)]

pub mod config;

pub use config::{Config, StoreBackend};

use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticket_gate_core::environment::SystemClock;
use ticket_gate_core::error::GateError;
use ticket_gate_core::store::KeyValueStore;
use ticket_gate_redis::RedisStore;
use ticket_gate_runtime::metrics::MetricsExporter;
use ticket_gate_runtime::retry::{RetryPolicy, retry_with_predicate};
use ticket_gate_runtime::{ExpiryReconciler, TicketGate};
use ticket_gate_testing::InMemoryStore;
use ticket_gate_web::AppState;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Build the configured store and run until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns error if the store cannot be reached, the catalog is malformed,
/// the listener cannot bind or the server fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    match config.store.backend {
        StoreBackend::Redis => {
            info!(url = %config.store.redis_url, "Connecting to Redis");
            let connect = || RedisStore::new(&config.store.redis_url, config.store_timeout());
            let store = retry_with_predicate(startup_policy(), connect, |_| true)
                .await
                .context("Failed to connect to Redis")?;
            Application::build(&config, store).await?.run().await
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store: state is lost on restart and not shared");
            Application::build(&config, InMemoryStore::new()).await?.run().await
        }
    }
}

/// Backoff for startup work while the store comes up.
fn startup_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(200))
        .max_delay(Duration::from_secs(5))
        .build()
}

/// A fully wired gate, ready to serve.
pub struct Application<S> {
    listener: TcpListener,
    router: axum::Router,
    reconciler: ExpiryReconciler<S>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl<S: KeyValueStore> Application<S> {
    /// Seed stock, install metrics, bind the listener and prepare the
    /// reconciler over `store`.
    ///
    /// # Errors
    ///
    /// Returns error if the catalog is malformed, seeding keeps failing or
    /// the listener cannot bind.
    pub async fn build(config: &Config, store: S) -> anyhow::Result<Self> {
        let directory = config.directory().context("Invalid EVENTS or USERS")?;
        let gate = TicketGate::new(
            store,
            config.keyspace(),
            Arc::new(directory),
            Arc::new(SystemClock),
            config.gate_settings(),
        );

        let seeded = retry_with_predicate(startup_policy(), || gate.seed_stock(), GateError::is_retryable)
            .await
            .context("Failed to seed stock counters")?;
        info!(
            seeded,
            events = gate.directory().events().len(),
            "Stock counters ready"
        );

        let mut exporter = MetricsExporter::new();
        exporter.install()?;
        let mut state = AppState::new(gate.clone());
        if let Some(handle) = exporter.handle() {
            state = state.with_metrics(handle.clone());
        }

        let listener = TcpListener::bind(config.bind_address())
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            listener,
            router: ticket_gate_web::router(state),
            reconciler: ExpiryReconciler::new(gate, shutdown_rx),
            shutdown_tx,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run_until(self, signal: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let reconciler = self.reconciler.spawn();

        info!(address = ?self.listener.local_addr().ok(), "HTTP server listening");
        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, stopping reconciler");
        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(self.shutdown_timeout, reconciler).await {
            Ok(Ok(())) => info!("Reconciler stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Reconciler task failed"),
            Err(_) => warn!("Reconciler shutdown timed out"),
        }

        served.context("HTTP server failed")
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
