//! # Todo RPC Client
//!
//! Awaitable request/reply calls over a one-way message broker.
//!
//! ## Guarantees
//!
//! - A call registers its correlation ID before publishing.
//! - Each call resolves exactly once: with a reply, a timeout, or shutdown.
//! - A call that ends for any reason (including the caller dropping the
//!   future) leaves no entry behind in the correlation table.
//! - Late, duplicate and unknown replies are dropped and counted.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let client = Arc::new(RpcClient::connect(transport, ClientConfig::default()).await?);
//! let todos = TodoService::new(client).get_todos_by_user(42).await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use client::{ClientChannel, RpcClient};
pub use config::{ClientConfig, DEFAULT_RPC_TIMEOUT};
pub use domain::{CorrelationId, CorrelationTable, PendingReply, PendingStats};
pub use error::RpcError;
pub use service::{TodoService, TodoServiceError};
