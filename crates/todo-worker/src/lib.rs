//! # Todo Worker
//!
//! Consumes `todo.get_by_user` and `todo.create`, runs the matching handler
//! and settles every delivery exactly once.
//!
//! ## Error Taxonomy
//!
//! | Failure | Reply | Settlement |
//! |---------|-------|------------|
//! | Malformed or invalid request | none | dead-lettered at once |
//! | Repository failure | `success = false` | acked |
//! | Transport fault or handler panic | none | requeued, dead-lettered after `max_retries` |
//!
//! ## Architecture
//!
//! - `ports/` - outbound repository port
//! - `adapters/` - in-memory repository
//! - `handler/` - request handlers
//! - `service/` - dispatcher and queue consumer
//! - `testing` - fault doubles (`test-utils` feature)

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod config;
pub mod error;
pub mod handler;
pub mod ports;
pub mod service;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adapters::InMemoryTodoRepository;
pub use config::{WorkerConfig, DEFAULT_MAX_RETRIES, DEFAULT_PREFETCH, MAX_PREFETCH};
pub use error::{InfrastructureError, WorkerError};
pub use handler::{CreateTodoHandler, GetTodosHandler, HandlerOutcome, RequestHandler};
pub use ports::{RepositoryError, TodoRepository};
pub use service::{DeadLetterReason, DispatchOutcome, Dispatcher, QueueConsumer};
pub use worker::{TodoWorker, WorkerChannel};
