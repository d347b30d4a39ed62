//! Outbound (Driven) ports for the worker.
//!
//! The todo store is an external collaborator. Handlers only see this trait.

use async_trait::async_trait;
use shared_types::{Todo, UserId};
use thiserror::Error;

/// Generic storage failure. Handlers turn it into a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// CRUD store for todos.
#[async_trait]
pub trait TodoRepository: Send + Sync {
    /// Persist `todo`, returning it with its assigned id.
    async fn create(&self, todo: Todo) -> Result<Todo, RepositoryError>;

    /// Every todo owned by `user_id`, newest first.
    async fn list_by_owner(&self, user_id: UserId) -> Result<Vec<Todo>, RepositoryError>;
}
