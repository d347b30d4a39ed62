//! Ports for the worker.

pub mod outbound;

pub use outbound::{RepositoryError, TodoRepository};
