//! # Todo Relay
//!
//! Runs the worker and the RPC client side by side over an in-memory broker
//! until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize logging and metrics
//! 3. Start the runtime
//! 4. Wait for Ctrl+C, log a final metrics snapshot, then shut down gracefully

use anyhow::{Context, Result};
use todo_runtime::{RuntimeConfig, TodoRuntime};
use todo_telemetry::init_telemetry;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Invalid configuration")?;
    let _telemetry = init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    let runtime = TodoRuntime::start(&config).await?;

    info!("Todo relay is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    match runtime.metrics() {
        Ok(snapshot) => debug!(metrics = %snapshot, "Final metrics snapshot"),
        Err(e) => warn!(error = %e, "Failed to encode metrics"),
    }
    runtime.shutdown().await;
    Ok(())
}
