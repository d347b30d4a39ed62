//! # Single-Writer Channel
//!
//! Broker channels are not safe for concurrent writers. [`SerializedChannel`]
//! funnels `publish`, `ack` and `nack` through one async mutex so a channel
//! shared between many tasks only ever sees one write at a time.

use crate::transport::{
    BrokerError, BrokerTransport, Consumer, DeliveryTag, ExchangeKind, QueueDeclaration,
};
use async_trait::async_trait;
use bytes::Bytes;
use shared_types::MessageProperties;
use tokio::sync::Mutex;

pub struct SerializedChannel<T> {
    inner: T,
    write_lock: Mutex<()>,
}

impl<T: BrokerTransport> SerializedChannel<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            write_lock: Mutex::new(()),
        }
    }

    /// The wrapped channel.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: BrokerTransport> BrokerTransport for SerializedChannel<T> {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.inner.declare_exchange(name, kind, durable).await
    }

    async fn declare_queue(&self, declaration: QueueDeclaration) -> Result<(), BrokerError> {
        self.inner.declare_queue(declaration).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.inner.bind_queue(queue, exchange, routing_key).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.inner
            .publish(exchange, routing_key, properties, body)
            .await
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        self.inner.consume(queue).await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.inner.ack(tag).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.inner.nack(tag, requeue).await
    }
}
