//! # Domain Entities
//!
//! The todo item as it travels between the REST boundary, the broker and the
//! worker's repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the user owning a todo.
pub type UserId = i64;

/// Repository-assigned todo identifier. `0` means "not yet stored".
pub type TodoId = i64;

/// A single todo item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    /// Repository-assigned identifier.
    #[serde(default)]
    pub id: TodoId,
    /// Short description.
    #[serde(default)]
    pub title: String,
    /// Whether the item is done.
    #[serde(default)]
    pub is_completed: bool,
    /// Owner of the item.
    pub user_id: UserId,
    /// Creation time (UTC).
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Todo {
    /// Create an unsaved todo for `user_id`.
    #[must_use]
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            is_completed: false,
            user_id,
            created_at: Utc::now(),
        }
    }

    /// Returns true once the repository has assigned an id.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}
