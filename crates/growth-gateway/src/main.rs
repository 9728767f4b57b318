//! Gateway binary for the Growth Pattern calculator.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `growth-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Open the calculation store and run migrations
//! 4. Serve the HTTP API until `Ctrl-C`
//! 5. Close the store

mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use growth_api::{AppState, ServerConfig};
use growth_core::{GatewayConfig, LogFormat, LoggingConfig, StoreBackend, StoreConfig};
use growth_db::{CalculationStore, MemoryStore, PgCalculationStore, PostgresConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::GatewayError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "growth-config.yaml";

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let config = load_config()?;
    init_logging(&config.logging);

    info!(
        host = %config.server.host,
        port = config.server.port,
        backend = ?config.store.backend,
        step_delay_ms = config.session.step_delay_ms,
        idle_timeout_secs = config.session.idle_timeout_secs,
        disconnect_policy = ?config.session.disconnect_policy,
        "growth-gateway starting"
    );

    let store = open_store(&config.store).await?;
    let state = Arc::new(AppState::new(Arc::clone(&store), config.session.clone()));

    let served = growth_api::start_server(&ServerConfig::from(&config.server), state).await;
    store.close().await;
    served?;

    info!("growth-gateway stopped");
    Ok(())
}

/// Load `growth-config.yaml`, or defaults plus environment overrides.
fn load_config() -> Result<GatewayConfig, GatewayError> {
    let path = Path::new(CONFIG_PATH);
    if path.exists() {
        return Ok(GatewayConfig::from_file(path)?);
    }
    let mut config = GatewayConfig::default();
    config.apply_env_overrides()?;
    Ok(config)
}

/// `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn CalculationStore>, GatewayError> {
    match config.backend {
        StoreBackend::Postgres => {
            let pg_config = PostgresConfig::new(&config.postgres_url)
                .with_max_connections(config.max_connections)
                .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs));
            let store = PgCalculationStore::connect(&pg_config).await?;
            info!(max_connections = config.max_connections, "Connected to PostgreSQL");

            if config.run_migrations {
                store.run_migrations().await?;
                info!("Migrations applied");
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; calculations are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
