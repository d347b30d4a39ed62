//! # Queue Topology
//!
//! Declares, idempotently, the queues the todo RPC layer needs:
//!
//! ```text
//!   publisher ──► <queue> ──nack(requeue=false)──► todo.deadletter (direct)
//!                                                        │ routing key = <queue>
//!                                                        ▼
//!                                                 <queue>.deadletter
//! ```
//!
//! Declaration order is exchange, dead-letter queues, bindings, then main
//! queues, so a main queue never exists without somewhere to dead-letter to.

use crate::transport::{BrokerError, BrokerTransport, ExchangeKind, QueueDeclaration};
use shared_types::{TodoQueue, DEAD_LETTER_EXCHANGE, DEAD_LETTER_SUFFIX};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

/// Topology declaration and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Topology has no queues")]
    Empty,

    #[error("Main queue declared twice: {0}")]
    DuplicateQueue(String),

    #[error("Routing key used by more than one queue: {0}")]
    DuplicateRoutingKey(String),

    #[error("Dead-letter queue shared between routes: {0}")]
    DuplicateDeadLetterQueue(String),

    /// The broker refused to declare `element`.
    #[error("Failed to declare {element}: {source}")]
    Declare {
        element: String,
        #[source]
        source: BrokerError,
    },
}

/// One main queue and its dead-letter counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRoute {
    pub main_queue: String,
    pub dead_letter_queue: String,
    /// Key under which the dead-letter exchange routes this queue's rejects.
    pub routing_key: String,
}

impl QueueRoute {
    /// Route for `main_queue` with the conventional `.deadletter` suffix.
    #[must_use]
    pub fn for_queue(main_queue: impl Into<String>) -> Self {
        let main_queue = main_queue.into();
        Self {
            dead_letter_queue: format!("{main_queue}{DEAD_LETTER_SUFFIX}"),
            routing_key: main_queue.clone(),
            main_queue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub dead_letter_exchange: String,
    pub routes: Vec<QueueRoute>,
}

impl QueueTopology {
    pub fn for_queues<I, S>(dead_letter_exchange: impl Into<String>, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dead_letter_exchange: dead_letter_exchange.into(),
            routes: queues.into_iter().map(QueueRoute::for_queue).collect(),
        }
    }

    /// Topology for every todo request queue.
    #[must_use]
    pub fn todo() -> Self {
        Self::for_queues(
            DEAD_LETTER_EXCHANGE,
            TodoQueue::ALL.iter().map(|q| q.queue_name()),
        )
    }

    /// Reject topologies where one dead-letter queue could receive another
    /// route's messages.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.routes.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut queues = HashSet::new();
        let mut keys = HashSet::new();
        let mut dead_letters = HashSet::new();
        for route in &self.routes {
            if !queues.insert(route.main_queue.as_str()) {
                return Err(TopologyError::DuplicateQueue(route.main_queue.clone()));
            }
            if !keys.insert(route.routing_key.as_str()) {
                return Err(TopologyError::DuplicateRoutingKey(route.routing_key.clone()));
            }
            if !dead_letters.insert(route.dead_letter_queue.as_str()) {
                return Err(TopologyError::DuplicateDeadLetterQueue(
                    route.dead_letter_queue.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Declare the whole topology. Safe to call repeatedly.
    pub async fn declare<T>(&self, transport: &T) -> Result<(), TopologyError>
    where
        T: BrokerTransport + ?Sized,
    {
        self.validate()?;

        transport
            .declare_exchange(&self.dead_letter_exchange, ExchangeKind::Direct, true)
            .await
            .map_err(|source| TopologyError::Declare {
                element: format!("exchange '{}'", self.dead_letter_exchange),
                source,
            })?;

        for route in &self.routes {
            transport
                .declare_queue(QueueDeclaration::durable(&route.dead_letter_queue))
                .await
                .map_err(|source| TopologyError::Declare {
                    element: format!("queue '{}'", route.dead_letter_queue),
                    source,
                })?;
        }

        for route in &self.routes {
            transport
                .bind_queue(
                    &route.dead_letter_queue,
                    &self.dead_letter_exchange,
                    &route.routing_key,
                )
                .await
                .map_err(|source| TopologyError::Declare {
                    element: format!(
                        "binding '{}' -> '{}'",
                        route.routing_key, route.dead_letter_queue
                    ),
                    source,
                })?;
        }

        for route in &self.routes {
            let declaration = QueueDeclaration::durable(&route.main_queue)
                .with_dead_letter(&self.dead_letter_exchange, &route.routing_key);
            transport
                .declare_queue(declaration)
                .await
                .map_err(|source| TopologyError::Declare {
                    element: format!("queue '{}'", route.main_queue),
                    source,
                })?;
            debug!(
                queue = %route.main_queue,
                dead_letter_queue = %route.dead_letter_queue,
                "Route declared"
            );
        }

        info!(
            exchange = %self.dead_letter_exchange,
            routes = self.routes.len(),
            "Queue topology declared"
        );
        Ok(())
    }
}
