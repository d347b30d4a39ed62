//! # Todo Runtime
//!
//! Wires the todo relay together in one process:
//!
//! ```text
//!   TodoService ─► RpcClient ──(channel A)──► InMemoryBroker ──(channel B)──► TodoWorker
//!                      ▲                                                          │
//!                      └──────────────── direct reply-to ◄────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Start the worker (declares the topology, then consumes)
//! 2. Connect the RPC client on its own channel
//! 3. Expose the todo service
//!
//! Metrics live in the process-wide Prometheus registry; [`TodoRuntime::metrics`]
//! renders them in text exposition format for whatever endpoint the embedding
//! application serves.
//!
//! Shutdown runs in reverse: the client first, so no new requests are sent,
//! then the worker, which drains in-flight deliveries.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;

pub use config::{ConfigError, RuntimeConfig};

use anyhow::{Context, Result};
use shared_bus::{BrokerTransport, InMemoryBroker};
use std::sync::Arc;
use todo_rpc_client::{RpcClient, TodoService};
use todo_telemetry::{encode_metrics, register_metrics, TelemetryError};
use todo_worker::{InMemoryTodoRepository, TodoRepository, TodoWorker};
use tracing::info;

/// The running relay: broker, worker and client.
pub struct TodoRuntime {
    broker: InMemoryBroker,
    worker: TodoWorker,
    client: Arc<RpcClient>,
    service: TodoService,
}

impl TodoRuntime {
    /// Start with a fresh in-memory broker and repository.
    pub async fn start(config: &RuntimeConfig) -> Result<Self> {
        Self::start_with(
            config,
            InMemoryBroker::new(),
            Arc::new(InMemoryTodoRepository::new()),
        )
        .await
    }

    /// Start against an existing broker and repository.
    pub async fn start_with(
        config: &RuntimeConfig,
        broker: InMemoryBroker,
        repository: Arc<dyn TodoRepository>,
    ) -> Result<Self> {
        let worker_channel: Arc<dyn BrokerTransport> = Arc::new(broker.channel());
        let worker = TodoWorker::start(worker_channel, repository, config.worker.clone())
            .await
            .context("Failed to start todo worker")?;

        let client_channel: Arc<dyn BrokerTransport> = Arc::new(broker.channel());
        let client = match RpcClient::connect(client_channel, config.client.clone()).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                worker.shutdown().await;
                return Err(e).context("Failed to connect RPC client");
            }
        };
        let service = TodoService::new(Arc::clone(&client));

        info!(
            rpc_timeout_ms = config.client.default_timeout.as_millis(),
            max_retries = config.worker.max_retries,
            prefetch = config.worker.prefetch,
            "Todo runtime started"
        );

        Ok(Self {
            broker,
            worker,
            client,
            service,
        })
    }

    pub fn service(&self) -> &TodoService {
        &self.service
    }

    pub fn client(&self) -> Arc<RpcClient> {
        Arc::clone(&self.client)
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Current metrics in Prometheus text format.
    pub fn metrics(&self) -> Result<String, TelemetryError> {
        register_metrics()?;
        encode_metrics()
    }

    /// Stop the client, then drain and stop the worker.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        self.client.shutdown().await;
        self.worker.shutdown().await;
        info!("Shutdown complete");
    }
}
