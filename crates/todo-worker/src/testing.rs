//! Testing Utilities
//!
//! Fault-injecting doubles for the worker's collaborators. Available to this
//! crate's tests and, with the `test-utils` feature flag, to other crates.

use crate::ports::{RepositoryError, TodoRepository};
use async_trait::async_trait;
use bytes::Bytes;
use shared_bus::{
    BrokerChannel, BrokerError, BrokerTransport, Consumer, DeliveryTag, ExchangeKind,
    QueueDeclaration,
};
use shared_types::{MessageProperties, Todo, UserId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Broker channel whose first `publish_failures` publishes are refused.
///
/// Optionally refuses every `nack` as well, leaving deliveries unsettled.
pub struct FaultyChannel {
    inner: BrokerChannel,
    publish_failures_left: AtomicU32,
    publish_attempts: AtomicU32,
    fail_nacks: AtomicBool,
}

impl FaultyChannel {
    pub fn new(inner: BrokerChannel, publish_failures: u32) -> Self {
        Self {
            inner,
            publish_failures_left: AtomicU32::new(publish_failures),
            publish_attempts: AtomicU32::new(0),
            fail_nacks: AtomicBool::new(false),
        }
    }

    /// Refuse every `nack` from now on.
    pub fn with_failing_nacks(self) -> Self {
        self.fail_nacks.store(true, Ordering::SeqCst);
        self
    }

    /// Every publish attempted, refused or not.
    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &BrokerChannel {
        &self.inner
    }
}

#[async_trait]
impl BrokerTransport for FaultyChannel {
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
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .publish_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::PublishFailed("broker connection blocked".into()));
        }
        self.inner
            .publish(exchange, routing_key, properties, body)
            .await
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        self.inner.consume(queue).await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.inner.ack(tag).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        if self.fail_nacks.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        self.inner.nack(tag, requeue).await
    }
}

/// Repository whose backing store is down.
pub struct UnavailableRepository;

#[async_trait]
impl TodoRepository for UnavailableRepository {
    async fn create(&self, _todo: Todo) -> Result<Todo, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".into()))
    }

    async fn list_by_owner(&self, _user_id: UserId) -> Result<Vec<Todo>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".into()))
    }
}
