//! Ticket gate server.
//!
//! # Usage
//!
//! ```bash
//! # Against a local Redis
//! REDIS_URL=redis://localhost:6379 cargo run --bin ticket-gate
//!
//! # Without Redis
//! STORE_BACKEND=memory cargo run --bin ticket-gate
//! ```

use ticket_gate_server::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticket_gate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        backend = ?config.store.backend,
        address = %config.bind_address(),
        max_payment_slots = config.gate.max_payment_slots,
        payment_ttl_secs = config.gate.payment_ttl_secs,
        "Configuration loaded"
    );

    ticket_gate_server::run(config).await
}
