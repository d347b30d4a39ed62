//! # RPC Client
//!
//! Request/reply over a one-way broker.
//!
//! ```text
//!   send() ──register──► CorrelationTable ◄──complete── ReplyListener
//!     │                        ▲                             ▲
//!     └──publish(reply_to)──► queue ──► worker ──reply──► direct reply-to
//! ```
//!
//! One client owns one channel, one direct reply-to consumer and one
//! listener task, shared by every concurrent call.

use crate::config::ClientConfig;
use crate::domain::{CorrelationId, CorrelationTable, PendingReply};
use crate::error::RpcError;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_bus::{
    BrokerTransport, Consumer, Delivery, SerializedChannel, DEFAULT_EXCHANGE, DIRECT_REPLY_TO,
};
use shared_types::MessageProperties;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use todo_telemetry::{RPC_DURATION, RPC_REQUESTS, RPC_TIMEOUTS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Channel type the client publishes through.
pub type ClientChannel = SerializedChannel<Arc<dyn BrokerTransport>>;

pub struct RpcClient {
    channel: ClientChannel,
    table: Arc<CorrelationTable>,
    config: ClientConfig,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RpcClient {
    /// Start consuming direct reply-to on `transport` and spawn the reply
    /// listener. Must be called inside a Tokio runtime.
    pub async fn connect(
        transport: Arc<dyn BrokerTransport>,
        config: ClientConfig,
    ) -> Result<Self, RpcError> {
        let consumer = transport.consume(DIRECT_REPLY_TO).await?;
        let table = Arc::new(CorrelationTable::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = ReplyListener::new(Arc::clone(&table), consumer, shutdown_rx);
        let handle = tokio::spawn(listener.run());

        info!(
            default_timeout_ms = config.default_timeout.as_millis(),
            "RPC client connected"
        );

        Ok(Self {
            channel: SerializedChannel::new(transport),
            table,
            config,
            shutdown_tx,
            listener: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Publish `request` to `destination` and wait for the matching reply.
    ///
    /// `timeout` overrides the configured default for this call only.
    pub async fn send<Req, Resp>(
        &self,
        request: &Req,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        if self.is_shut_down() {
            return Err(RpcError::Shutdown);
        }
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let body = serde_json::to_vec(request).map_err(RpcError::Serialization)?;

        // Registered before publishing so an early reply always finds its entry.
        let (correlation_id, mut rx) = self.table.register(destination);
        let _guard = PendingGuard {
            table: &self.table,
            correlation_id,
        };
        // A shutdown that cleared the table before `register` never sees
        // this entry.
        if self.is_shut_down() {
            return Err(RpcError::Shutdown);
        }

        let started = Instant::now();
        let properties = MessageProperties::request(correlation_id.to_string(), DIRECT_REPLY_TO);
        self.channel
            .publish(DEFAULT_EXCHANGE, destination, properties, Bytes::from(body))
            .await?;
        RPC_REQUESTS.with_label_values(&[destination]).inc();

        debug!(
            correlation_id = %correlation_id,
            destination = destination,
            timeout_ms = timeout.as_millis(),
            "Sent RPC request"
        );

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => decode_reply(destination, reply),
            // Sender dropped without a reply: the table was cleared.
            Ok(Err(_)) => Err(RpcError::Shutdown),
            Err(_) => {
                if !self.table.expire(&correlation_id) {
                    // The listener or shutdown removed the entry first and
                    // owns the outcome; the sender fires or drops right after.
                    return match (&mut rx).await {
                        Ok(reply) => decode_reply(destination, reply),
                        Err(_) => Err(RpcError::Shutdown),
                    };
                }
                let elapsed = started.elapsed();
                RPC_TIMEOUTS.with_label_values(&[destination]).inc();
                warn!(
                    correlation_id = %correlation_id,
                    destination = destination,
                    elapsed_ms = elapsed.as_millis(),
                    "RPC request timed out"
                );
                Err(RpcError::Timeout {
                    destination: destination.to_string(),
                    elapsed,
                })
            }
        }
    }

    /// Stop the reply listener and fail every waiting call with
    /// [`RpcError::Shutdown`]. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Reply listener ended abnormally");
            }
        }
        let cleared = self.table.clear();
        info!(cleared = cleared, "RPC client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn correlation_table(&self) -> &CorrelationTable {
        &self.table
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn decode_reply<Resp: DeserializeOwned>(
    destination: &str,
    reply: PendingReply,
) -> Result<Resp, RpcError> {
    RPC_DURATION
        .with_label_values(&[destination])
        .observe(reply.response_time.as_secs_f64());
    serde_json::from_slice(&reply.body).map_err(|source| RpcError::Deserialization {
        destination: destination.to_string(),
        source,
    })
}

/// Removes the caller's entry however `send` exits, including when the
/// caller's future is dropped mid-wait.
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.table.cancel(&self.correlation_id) {
            debug!(
                correlation_id = %self.correlation_id,
                "Pending request abandoned by caller"
            );
        }
    }
}

/// Single long-lived task draining the reply destination.
struct ReplyListener {
    table: Arc<CorrelationTable>,
    consumer: Consumer,
    shutdown: watch::Receiver<bool>,
}

impl ReplyListener {
    fn new(
        table: Arc<CorrelationTable>,
        consumer: Consumer,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            table,
            consumer,
            shutdown,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("Reply listener stopping");
                        break;
                    }
                }
                delivery = self.consumer.next() => match delivery {
                    Some(delivery) => self.handle_reply(delivery),
                    None => {
                        warn!("Reply consumer closed, stopping listener");
                        break;
                    }
                },
            }
        }
        self.table.clear();
    }

    fn handle_reply(&self, delivery: Delivery) {
        let Some(raw_id) = delivery.envelope.correlation_id() else {
            self.table.record_dropped();
            debug!(delivery_tag = delivery.tag, "Reply without correlation ID dropped");
            return;
        };
        let Ok(correlation_id) = CorrelationId::parse(raw_id) else {
            self.table.record_dropped();
            debug!(correlation_id = raw_id, "Reply with malformed correlation ID dropped");
            return;
        };
        // Non-blocking handoff; a missing entry is counted by the table.
        self.table.complete(correlation_id, delivery.envelope.body);
    }
}
