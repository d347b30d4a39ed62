//! # Shared Bus - Broker Transport for the Todo RPC Layer
//!
//! Everything the RPC client and the worker need from a message broker.
//!
//! ## Components
//!
//! - [`BrokerTransport`]: the port. Declare, publish, consume, ack, nack.
//! - [`InMemoryBroker`]: an in-process broker with AMQP-style semantics
//!   (dead-letter exchanges, direct reply-to, redelivery on channel close).
//! - [`SerializedChannel`]: single-writer wrapper for a shared channel.
//! - [`QueueTopology`]: declares main queues and their dead-letter queues.
//!
//! ```text
//! ┌──────────────┐   publish(reply_to)   ┌──────────────┐
//! │  RPC Client  │ ────────────────────► │ todo.<queue> │
//! │              │                       └──────┬───────┘
//! │              │                              │ consume
//! │              │   publish(reply)      ┌──────▼───────┐
//! │              │ ◄──────────────────── │    Worker    │
//! └──────────────┘   direct reply-to     └──────────────┘
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod memory;
pub mod serialized;
pub mod topology;
pub mod transport;

// Re-export main types
pub use memory::{BrokerChannel, InMemoryBroker};
pub use serialized::SerializedChannel;
pub use topology::{QueueRoute, QueueTopology, TopologyError};
pub use transport::{
    BrokerError, BrokerTransport, Consumer, Delivery, DeliveryTag, ExchangeKind,
    QueueDeclaration, DEFAULT_EXCHANGE, DIRECT_REPLY_TO,
};
