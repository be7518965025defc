//! Tandem server binary.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tandem-config.yaml` (or `TANDEM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the gateway, wiring the `PostgreSQL` mirror and block list
//!    when persistence is enabled
//! 4. Start the idle-cursor sweep if a cursor TTL is configured
//! 5. Serve HTTP until the process is terminated

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tandem_core::blocklist::BlockList;
use tandem_core::config::{ConfigError, LoggingConfig, TandemConfig};
use tandem_core::gateway::{Gateway, spawn_presence_sweep};
use tandem_core::mirror::MirrorHandle;
use tandem_db::{MirrorWriter, PostgresPool, spawn_block_list_refresh};
use tandem_server::{AppState, start_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Configuration file read when `TANDEM_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "tandem-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, database setup or the server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        path = %config_path.display(),
        host = %config.server.host,
        port = config.server.port,
        persistence = config.persistence.enabled,
        cursor_ttl_secs = config.presence.cursor_ttl_secs,
        "tandem-server starting"
    );

    // 3. Build the gateway.
    let gateway = build_gateway(&config).await?;
    let gateway = Arc::new(gateway);

    // 4. Idle cursor sweep.
    let _sweep = spawn_presence_sweep(Arc::clone(&gateway), &config.presence);

    // 5. Serve.
    let state = Arc::new(
        AppState::new(gateway)
            .with_keep_alive(Duration::from_secs(config.server.keep_alive_secs.max(1))),
    );
    start_server(&config.server, state).await?;

    info!("tandem-server stopped");
    Ok(())
}

/// Read the configuration file, falling back to defaults when it is absent.
fn load_config() -> Result<(TandemConfig, PathBuf), ConfigError> {
    let path = std::env::var("TANDEM_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = if path.exists() {
        TandemConfig::from_file(&path)?
    } else {
        TandemConfig::parse("")?
    };
    Ok((config, path))
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Assemble the gateway from configuration.
async fn build_gateway(config: &TandemConfig) -> Result<Gateway, Box<dyn std::error::Error>> {
    let gateway = Gateway::new().with_subscriber_buffer(config.server.subscriber_buffer.max(1));
    if !config.persistence.enabled {
        info!("Persistence disabled, running memory-only");
        return Ok(gateway);
    }

    let persistence = &config.persistence;
    let postgres = PostgresPool::connect_url(&persistence.postgres_url).await?;
    postgres.run_migrations().await?;

    let (mirror, rx) = MirrorHandle::channel(persistence.mirror_queue_capacity.max(1));
    let _writer = MirrorWriter::new(postgres.pool().clone()).spawn(rx);

    let blocks = Arc::new(BlockList::new());
    let _refresh = spawn_block_list_refresh(
        postgres.pool().clone(),
        Arc::clone(&blocks),
        Duration::from_secs(persistence.block_list_refresh_secs.max(1)),
    );
    info!(
        mirror_queue_capacity = persistence.mirror_queue_capacity,
        block_list_refresh_secs = persistence.block_list_refresh_secs,
        "Persistence mirror and block list enabled"
    );

    Ok(gateway.with_mirror(mirror).with_block_check(blocks))
}
