//! # Broker Transport Port
//!
//! The abstract at-least-once, unordered message transport both sides of the
//! request/reply layer talk to. Implementations must honour these contracts:
//!
//! - Every delivery is settled exactly once, by `ack` or `nack`. A second
//!   settlement of the same tag fails with [`BrokerError::UnknownDeliveryTag`].
//! - `nack(tag, true)` puts the message back on its queue with the
//!   `x-retry-count` header incremented by one.
//! - `nack(tag, false)` routes the message through the queue's dead-letter
//!   exchange under the queue's dead-letter routing key, or drops it when the
//!   queue has none.
//! - Publishing with `reply_to` set to [`DIRECT_REPLY_TO`] is only legal on a
//!   channel that consumes [`DIRECT_REPLY_TO`]; replies come back to it.

use async_trait::async_trait;
use bytes::Bytes;
use shared_types::{Envelope, MessageProperties, RetryCount};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Well-known pseudo-queue for direct reply-to.
pub const DIRECT_REPLY_TO: &str = "amq.rabbitmq.reply-to";

/// The nameless exchange that routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Broker-assigned identifier of a single delivery.
pub type DeliveryTag = u64;

/// Errors from broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    /// The operation conflicts with existing broker state.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(DeliveryTag),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Every bound queue, routing key ignored.
    Fanout,
}

/// Arguments for declaring a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
}

impl QueueDeclaration {
    /// A durable queue with no dead-letter wiring.
    #[must_use]
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        }
    }

    /// Route rejected messages to `exchange` under `routing_key`.
    #[must_use]
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the message was delivered before and went back to its queue.
    pub redelivered: bool,
    pub envelope: Envelope,
}

impl Delivery {
    #[must_use]
    pub fn properties(&self) -> &MessageProperties {
        &self.envelope.properties
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.envelope.body
    }

    #[must_use]
    pub fn retry_count(&self) -> RetryCount {
        self.envelope.retry_count()
    }
}

/// Receiving end of a `consume` registration.
///
/// Yields `None` once the owning channel is closed.
pub struct Consumer {
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Consumer {
    #[must_use]
    pub fn new(queue: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            receiver,
        }
    }

    /// Queue this consumer is attached to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

impl Stream for Consumer {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A channel to the broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn declare_queue(&self, declaration: QueueDeclaration) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;
}

#[async_trait]
impl<T> BrokerTransport for Arc<T>
where
    T: BrokerTransport + ?Sized,
{
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        (**self).declare_exchange(name, kind, durable).await
    }

    async fn declare_queue(&self, declaration: QueueDeclaration) -> Result<(), BrokerError> {
        (**self).declare_queue(declaration).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        (**self).bind_queue(queue, exchange, routing_key).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        (**self).publish(exchange, routing_key, properties, body).await
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        (**self).consume(queue).await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        (**self).ack(tag).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        (**self).nack(tag, requeue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_declaration_builder() {
        let declaration =
            QueueDeclaration::durable("todo.create").with_dead_letter("todo.deadletter", "todo.create");
        assert!(declaration.durable);
        assert_eq!(declaration.dead_letter_exchange.as_deref(), Some("todo.deadletter"));
        assert_eq!(declaration.dead_letter_routing_key.as_deref(), Some("todo.create"));
    }

    #[tokio::test]
    async fn test_consumer_recv_and_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut consumer = Consumer::new("q", rx);
        assert_eq!(consumer.queue(), "q");

        tx.send(Delivery {
            tag: 1,
            exchange: String::new(),
            routing_key: "q".into(),
            redelivered: false,
            envelope: Envelope::new(MessageProperties::default(), Bytes::from_static(b"{}")),
        })
        .unwrap();
        drop(tx);

        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.tag, 1);
        assert_eq!(delivery.retry_count(), RetryCount::ZERO);
        assert!(consumer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_consumer_as_stream_ends_on_close() {
        use tokio_stream::StreamExt;

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = Consumer::new("q", rx);
        for tag in 1..=3 {
            tx.send(Delivery {
                tag,
                exchange: String::new(),
                routing_key: "q".into(),
                redelivered: false,
                envelope: Envelope::new(MessageProperties::default(), Bytes::from_static(b"{}")),
            })
            .unwrap();
        }
        drop(tx);

        let tags: Vec<_> = consumer.map(|delivery| delivery.tag).collect().await;
        assert_eq!(tags, vec![1, 2, 3]);
    }
}
