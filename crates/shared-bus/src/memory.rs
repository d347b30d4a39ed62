//! # In-Memory Broker
//!
//! A single-process broker with AMQP-style queues, direct/fanout exchanges,
//! dead-letter routing and direct reply-to. Suitable for single-node
//! operation and tests; distributed deployments would put a real broker
//! behind the same [`BrokerTransport`] port.
//!
//! All broker state sits behind one `parking_lot::Mutex`. No operation awaits
//! while holding it, so channels may be used from any task.

use crate::transport::{
    BrokerError, BrokerTransport, Consumer, Delivery, DeliveryTag, ExchangeKind,
    QueueDeclaration, DEFAULT_EXCHANGE, DIRECT_REPLY_TO,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use shared_types::{Envelope, MessageProperties};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Header naming the queue a message was first dead-lettered from.
pub const FIRST_DEATH_QUEUE_HEADER: &str = "x-first-death-queue";

/// Header naming why a message was first dead-lettered.
pub const FIRST_DEATH_REASON_HEADER: &str = "x-first-death-reason";

type ChannelId = u64;

struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<Binding>,
}

#[derive(Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

struct QueuedMessage {
    exchange: String,
    routing_key: String,
    redelivered: bool,
    envelope: Envelope,
}

struct ConsumerSlot {
    channel_id: ChannelId,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct QueueState {
    declaration: QueueDeclaration,
    ready: VecDeque<QueuedMessage>,
    consumers: Vec<ConsumerSlot>,
    cursor: usize,
}

struct Unacked {
    channel_id: ChannelId,
    queue: String,
    message: QueuedMessage,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    unacked: HashMap<DeliveryTag, Unacked>,
    reply_consumers: HashMap<String, ConsumerSlot>,
    next_tag: DeliveryTag,
}

fn is_reply_address(routing_key: &str) -> bool {
    routing_key
        .strip_prefix(DIRECT_REPLY_TO)
        .is_some_and(|rest| rest.starts_with('.'))
}

impl BrokerState {
    fn allocate_tag(&mut self) -> DeliveryTag {
        self.next_tag += 1;
        self.next_tag
    }

    /// Route a message; returns the number of destinations it reached.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<usize, BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            if is_reply_address(routing_key) {
                return Ok(usize::from(self.deliver_reply(routing_key, envelope)));
            }
            if !self.queues.contains_key(routing_key) {
                debug!(routing_key = routing_key, "Unroutable message dropped");
                return Ok(0);
            }
            self.enqueue(
                routing_key,
                QueuedMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                    envelope,
                },
            );
            return Ok(1);
        }

        let exchange_state = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        let mut targets: Vec<String> = Vec::new();
        for binding in &exchange_state.bindings {
            let matches = match exchange_state.kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Fanout => true,
            };
            if matches && !targets.contains(&binding.queue) {
                targets.push(binding.queue.clone());
            }
        }

        if targets.is_empty() {
            debug!(
                exchange = exchange,
                routing_key = routing_key,
                "No binding matched, message dropped"
            );
        }

        for queue in &targets {
            self.enqueue(
                queue,
                QueuedMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                    envelope: envelope.clone(),
                },
            );
        }
        Ok(targets.len())
    }

    fn deliver_reply(&mut self, address: &str, envelope: Envelope) -> bool {
        let tag = self.allocate_tag();
        let Some(slot) = self.reply_consumers.get(address) else {
            debug!(reply_to = address, "Reply for absent consumer dropped");
            return false;
        };
        let delivery = Delivery {
            tag,
            exchange: DEFAULT_EXCHANGE.to_string(),
            routing_key: address.to_string(),
            redelivered: false,
            envelope,
        };
        if slot.sender.send(delivery).is_err() {
            debug!(reply_to = address, "Reply consumer gone, reply dropped");
            self.reply_consumers.remove(address);
            return false;
        }
        true
    }

    fn enqueue(&mut self, queue: &str, message: QueuedMessage) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };
        state.ready.push_back(message);
        self.pump(queue);
    }

    /// Hand ready messages to live consumers, round-robin.
    fn pump(&mut self, queue: &str) {
        loop {
            let Some(state) = self.queues.get_mut(queue) else {
                return;
            };
            if state.consumers.is_empty() {
                return;
            }
            let Some(message) = state.ready.pop_front() else {
                return;
            };

            let tag = self.next_tag + 1;
            let index = state.cursor % state.consumers.len();
            let delivery = Delivery {
                tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                envelope: message.envelope.clone(),
            };

            if state.consumers[index].sender.send(delivery).is_ok() {
                state.cursor = index + 1;
                let channel_id = state.consumers[index].channel_id;
                self.next_tag = tag;
                self.unacked.insert(
                    tag,
                    Unacked {
                        channel_id,
                        queue: queue.to_string(),
                        message,
                    },
                );
            } else {
                // Receiver dropped; forget it and offer the message again.
                state.consumers.remove(index);
                state.ready.push_front(message);
            }
        }
    }

    fn take_unacked(
        &mut self,
        channel_id: ChannelId,
        tag: DeliveryTag,
    ) -> Result<Unacked, BrokerError> {
        let owned = self
            .unacked
            .get(&tag)
            .is_some_and(|entry| entry.channel_id == channel_id);
        if !owned {
            return Err(BrokerError::UnknownDeliveryTag(tag));
        }
        self.unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }

    fn requeue(&mut self, queue: &str, mut message: QueuedMessage) {
        let headers = &mut message.envelope.properties.headers;
        let next = headers.retry_count().next();
        headers.set_retry_count(next);
        message.redelivered = true;
        self.enqueue(queue, message);
    }

    fn dead_letter(&mut self, queue: &str, message: QueuedMessage) {
        let Some(state) = self.queues.get(queue) else {
            return;
        };
        let Some(exchange) = state.declaration.dead_letter_exchange.clone() else {
            debug!(queue = queue, "Rejected message dropped (no dead-letter exchange)");
            return;
        };
        let routing_key = state
            .declaration
            .dead_letter_routing_key
            .clone()
            .unwrap_or_else(|| message.routing_key.clone());

        let mut envelope = message.envelope;
        let headers = &mut envelope.properties.headers;
        if headers.get(FIRST_DEATH_QUEUE_HEADER).is_none() {
            headers.insert(FIRST_DEATH_QUEUE_HEADER, queue);
            headers.insert(FIRST_DEATH_REASON_HEADER, "rejected");
        }

        match self.route(&exchange, &routing_key, envelope) {
            Ok(0) => warn!(
                queue = queue,
                exchange = %exchange,
                routing_key = %routing_key,
                "Dead-lettered message matched no queue"
            ),
            Ok(_) => debug!(queue = queue, exchange = %exchange, "Message dead-lettered"),
            Err(e) => warn!(
                queue = queue,
                error = %e,
                "Dead-letter exchange missing, message dropped"
            ),
        }
    }

    /// Detach everything a closing channel owned.
    ///
    /// Its unsettled deliveries go back to the front of their queues,
    /// flagged as redelivered, without touching the retry count.
    fn release_channel(&mut self, channel_id: ChannelId) {
        for state in self.queues.values_mut() {
            state.consumers.retain(|slot| slot.channel_id != channel_id);
        }
        self.reply_consumers
            .retain(|_, slot| slot.channel_id != channel_id);

        let mut tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, entry)| entry.channel_id == channel_id)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));

        let mut touched: Vec<String> = Vec::new();
        for tag in tags {
            let Some(mut entry) = self.unacked.remove(&tag) else {
                continue;
            };
            entry.message.redelivered = true;
            if let Some(state) = self.queues.get_mut(&entry.queue) {
                state.ready.push_front(entry.message);
                if !touched.contains(&entry.queue) {
                    touched.push(entry.queue);
                }
            }
        }
        for queue in touched {
            self.pump(&queue);
        }
    }
}

/// Shared handle to the in-process broker. Cheap to clone.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_channel: Arc<AtomicU64>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new channel.
    #[must_use]
    pub fn channel(&self) -> BrokerChannel {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(channel_id = id, "Channel opened");
        BrokerChannel {
            id,
            broker: self.clone(),
            reply_address: format!("{DIRECT_REPLY_TO}.{id}"),
            closed: AtomicBool::new(false),
        }
    }

    /// Messages waiting in `queue` (not yet delivered).
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.ready.len())
    }

    /// Live consumers attached to `queue`.
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.consumers.len())
    }

    /// Deliveries handed out but not yet settled, across all queues.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    #[must_use]
    pub fn queue_declaration(&self, queue: &str) -> Option<QueueDeclaration> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.declaration.clone())
    }

    #[must_use]
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().exchanges.contains_key(exchange)
    }

    /// True if `queue` is bound to `exchange` under `routing_key`.
    #[must_use]
    pub fn is_bound(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        self.state.lock().exchanges.get(exchange).is_some_and(|e| {
            e.bindings
                .iter()
                .any(|b| b.queue == queue && b.routing_key == routing_key)
        })
    }
}

/// One channel to an [`InMemoryBroker`].
///
/// Dropping the channel closes it: its consumers stop and its unsettled
/// deliveries return to their queues.
pub struct BrokerChannel {
    id: ChannelId,
    broker: InMemoryBroker,
    reply_address: String,
    closed: AtomicBool,
}

impl BrokerChannel {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Private address that direct reply-to resolves to for this channel.
    #[must_use]
    pub fn reply_address(&self) -> &str {
        &self.reply_address
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broker.state.lock().release_channel(self.id);
        debug!(channel_id = self.id, "Channel closed");
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}

impl Drop for BrokerChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl BrokerTransport for BrokerChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "cannot redeclare the default exchange".into(),
            ));
        }

        let mut state = self.broker.state.lock();
        if let Some(existing) = state.exchanges.get(name) {
            if existing.kind != kind || existing.durable != durable {
                return Err(BrokerError::PreconditionFailed(format!(
                    "exchange '{name}' already declared with different arguments"
                )));
            }
            return Ok(());
        }
        state.exchanges.insert(
            name.to_string(),
            ExchangeState {
                kind,
                durable,
                bindings: Vec::new(),
            },
        );
        debug!(exchange = name, kind = ?kind, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, declaration: QueueDeclaration) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if declaration.name.is_empty() || declaration.name.starts_with(DIRECT_REPLY_TO) {
            return Err(BrokerError::PreconditionFailed(format!(
                "invalid queue name '{}'",
                declaration.name
            )));
        }

        let mut state = self.broker.state.lock();
        if let Some(existing) = state.queues.get(&declaration.name) {
            if existing.declaration != declaration {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{}' already declared with different arguments",
                    declaration.name
                )));
            }
            return Ok(());
        }
        debug!(
            queue = %declaration.name,
            dead_letter_exchange = ?declaration.dead_letter_exchange,
            "Queue declared"
        );
        state.queues.insert(
            declaration.name.clone(),
            QueueState {
                declaration,
                ready: VecDeque::new(),
                consumers: Vec::new(),
                cursor: 0,
            },
        );
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let exchange_state = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        let binding = Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !exchange_state.bindings.contains(&binding) {
            exchange_state.bindings.push(binding);
            debug!(
                queue = queue,
                exchange = exchange,
                routing_key = routing_key,
                "Queue bound"
            );
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mut properties: MessageProperties,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if properties.reply_to.as_deref() == Some(DIRECT_REPLY_TO) {
            if !state.reply_consumers.contains_key(&self.reply_address) {
                return Err(BrokerError::PreconditionFailed(
                    "fast reply consumer does not exist".into(),
                ));
            }
            properties.reply_to = Some(self.reply_address.clone());
        }

        state.route(exchange, routing_key, Envelope::new(properties, body))?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.broker.state.lock();

        if queue == DIRECT_REPLY_TO {
            if state.reply_consumers.contains_key(&self.reply_address) {
                return Err(BrokerError::PreconditionFailed(
                    "direct reply-to already consumed on this channel".into(),
                ));
            }
            state.reply_consumers.insert(
                self.reply_address.clone(),
                ConsumerSlot {
                    channel_id: self.id,
                    sender,
                },
            );
            debug!(channel_id = self.id, "Consuming direct reply-to");
            return Ok(Consumer::new(queue, receiver));
        }

        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        queue_state.consumers.push(ConsumerSlot {
            channel_id: self.id,
            sender,
        });
        state.pump(queue);
        debug!(channel_id = self.id, queue = queue, "Consumer attached");
        Ok(Consumer::new(queue, receiver))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state.lock().take_unacked(self.id, tag)?;
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let entry = state.take_unacked(self.id, tag)?;
        if requeue {
            state.requeue(&entry.queue, entry.message);
        } else {
            state.dead_letter(&entry.queue, entry.message);
        }
        Ok(())
    }
}
