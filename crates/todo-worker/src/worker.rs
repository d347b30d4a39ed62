//! # Todo Worker
//!
//! Startup order: declare the queue topology, then attach one consumer per
//! request queue. A topology failure aborts startup before anything is
//! consumed.

use crate::config::{WorkerConfig, MAX_PREFETCH};
use crate::error::WorkerError;
use crate::handler::{CreateTodoHandler, GetTodosHandler, RequestHandler};
use crate::ports::TodoRepository;
use crate::service::{Dispatcher, QueueConsumer};
use shared_bus::{BrokerTransport, QueueTopology, SerializedChannel};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Channel type the worker consumes, replies and settles through.
pub type WorkerChannel = SerializedChannel<Arc<dyn BrokerTransport>>;

pub struct TodoWorker {
    shutdown_tx: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
}

impl TodoWorker {
    pub async fn start(
        transport: Arc<dyn BrokerTransport>,
        repository: Arc<dyn TodoRepository>,
        config: WorkerConfig,
    ) -> Result<Self, WorkerError> {
        if config.prefetch == 0 || config.prefetch > MAX_PREFETCH {
            return Err(WorkerError::InvalidConfig(format!(
                "prefetch must be between 1 and {MAX_PREFETCH}, got {}",
                config.prefetch
            )));
        }

        let topology = QueueTopology::todo();
        topology.declare(transport.as_ref()).await?;

        let channel: Arc<WorkerChannel> = Arc::new(SerializedChannel::new(transport));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumers = vec![
            spawn_consumer(
                GetTodosHandler::new(Arc::clone(&repository)),
                &channel,
                &config,
                shutdown_rx.clone(),
            )
            .await?,
            spawn_consumer(
                CreateTodoHandler::new(repository),
                &channel,
                &config,
                shutdown_rx,
            )
            .await?,
        ];

        info!(
            queues = consumers.len(),
            max_retries = config.max_retries,
            prefetch = config.prefetch,
            "Todo worker started"
        );

        Ok(Self {
            shutdown_tx,
            consumers,
        })
    }

    /// Stop consuming and wait for in-flight deliveries to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.consumers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Queue consumer ended abnormally");
            }
        }
        info!("Todo worker stopped");
    }
}

async fn spawn_consumer<H: RequestHandler>(
    handler: H,
    channel: &Arc<WorkerChannel>,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, WorkerError> {
    let queue = handler.queue().queue_name();
    let consumer = channel
        .consume(queue)
        .await
        .map_err(|source| WorkerError::Consume {
            queue: queue.to_string(),
            source,
        })?;

    let dispatcher = Arc::new(Dispatcher::new(
        handler,
        Arc::clone(channel),
        config.max_retries,
    ));
    Ok(tokio::spawn(
        QueueConsumer::new(dispatcher, config.prefetch).run(consumer, shutdown),
    ))
}
