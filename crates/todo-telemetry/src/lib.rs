//! # Todo Telemetry
//!
//! Observability for the todo RPC layer.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters, gauge and histogram in one registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use todo_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TODO_SERVICE_NAME` | `todo-relay` | Service name in the startup log |
//! | `TODO_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `TODO_JSON_LOGS` | `false` | JSON log lines (`true` in containers) |
//! | `TODO_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, RPC_DURATION, RPC_PENDING,
    RPC_REPLIES_DROPPED, RPC_REQUESTS, RPC_TIMEOUTS, WORKER_DISPATCH,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the global log subscriber.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    init_logging(config)?;
    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
    })
}

/// Guard that keeps telemetry active. Logs a final line on drop.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
