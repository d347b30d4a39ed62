//! Errors surfaced to callers of the RPC client.

use shared_bus::BrokerError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// No reply arrived before the deadline. Never retried automatically.
    #[error("Request to '{destination}' timed out after {}ms", .elapsed.as_millis())]
    Timeout {
        destination: String,
        elapsed: Duration,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] BrokerError),

    #[error("Failed to serialize request: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The reply body could not be decoded into the expected response type.
    #[error("Failed to decode reply from '{destination}': {source}")]
    Deserialization {
        destination: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("RPC client is shut down")]
    Shutdown,
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}
