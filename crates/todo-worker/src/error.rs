//! Worker error types.

use shared_bus::{BrokerError, TopologyError};
use thiserror::Error;

/// A fault outside the handler's control. Retried, then dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InfrastructureError {
    #[error("Transport fault: {0}")]
    Transport(#[from] BrokerError),

    #[error("Failed to encode reply: {0}")]
    ReplyEncoding(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Worker startup failures.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Queue topology declaration failed: {0}")]
    Topology(#[from] TopologyError),

    #[error("Failed to consume '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(String),
}
