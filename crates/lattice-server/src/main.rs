//! Lattice server binary.

use std::sync::Arc;
use std::time::Duration;

use lattice_core::config::LatticeConfig;
use lattice_error::Result;
use lattice_server::{logging, server, state::AppContext};

/// Heartbeat cadence for connected WebSocket clients.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = LatticeConfig::from_env()?;
    logging::init(&config.log_level);
    tracing::info!(app_env = %config.app_env, "starting lattice");

    let context = AppContext::build(config).await?;

    // Background loops: bus fan-out and client heartbeats. Both run for
    // the life of the process.
    tokio::spawn(Arc::clone(&context.hub).run_subscriber());
    tokio::spawn(Arc::clone(&context.hub).run_heartbeat(HEARTBEAT_INTERVAL));

    server::serve(context).await
}
