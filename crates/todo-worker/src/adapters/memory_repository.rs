//! In-memory todo store.

use crate::ports::{RepositoryError, TodoRepository};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{Todo, TodoId, UserId};
use std::cmp::Reverse;
use tracing::debug;

/// Process-local [`TodoRepository`]. Ids are assigned sequentially from 1.
#[derive(Default)]
pub struct InMemoryTodoRepository {
    inner: RwLock<Store>,
}

#[derive(Default)]
struct Store {
    todos: Vec<Todo>,
    last_id: TodoId,
}

impl InMemoryTodoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().todos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().todos.is_empty()
    }
}

#[async_trait]
impl TodoRepository for InMemoryTodoRepository {
    async fn create(&self, mut todo: Todo) -> Result<Todo, RepositoryError> {
        let mut store = self.inner.write();
        store.last_id += 1;
        todo.id = store.last_id;
        store.todos.push(todo.clone());
        debug!(todo_id = todo.id, user_id = todo.user_id, "Created todo");
        Ok(todo)
    }

    async fn list_by_owner(&self, user_id: UserId) -> Result<Vec<Todo>, RepositoryError> {
        let mut todos: Vec<Todo> = self
            .inner
            .read()
            .todos
            .iter()
            .filter(|todo| todo.user_id == user_id)
            .cloned()
            .collect();
        todos.sort_by_key(|todo| Reverse((todo.created_at, todo.id)));
        Ok(todos)
    }
}
