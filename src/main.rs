//! Gateway Entry Point
//!
//! This is the main entry point for the gateway. It initializes logging,
//! loads configuration, spawns the session/idempotency sweeper and starts
//! the server with the configured transport.

use std::time::Duration;

use anyhow::Result;
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use gateway_mcp_server::core::{Config, GatewayServer, TransportService};

/// How often expired sessions and idempotency records are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env();

    // Initialize logging
    init_logging(&config.logging.level);

    info!("Starting {} v{}", config.server.name, config.server.version);

    // Create the gateway server
    let server = GatewayServer::new(config.clone());

    info!("Server initialized");

    spawn_sweeper(&server);

    // Create and run the transport service
    let transport = TransportService::new(config.transport);
    transport.run(server).await?;

    info!("Server shutting down");

    Ok(())
}

/// Periodically drop expired sessions and aged-out idempotency records.
fn spawn_sweeper(server: &GatewayServer) {
    let sessions = server.sessions().clone();
    let pipeline = server.pipeline().clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let purged_sessions = sessions.purge_expired();
            let purged_records = pipeline.purge_idempotency_records();
            if purged_sessions > 0 || purged_records > 0 {
                debug!(
                    "Sweeper: {} sessions, {} idempotency records purged",
                    purged_sessions, purged_records
                );
            }
        }
    });
}

/// Initialize the logging subsystem.
///
/// Configures tracing with the specified log level and format.
fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
