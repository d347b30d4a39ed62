//! # Todo Service
//!
//! The narrow facade the HTTP boundary calls. `GET /todos` maps to
//! [`TodoService::get_todos_by_user`], `POST /todos` to
//! [`TodoService::create_todo`].

use crate::client::RpcClient;
use crate::error::RpcError;
use shared_types::{
    CreateTodoRequest, CreateTodoResponse, GetTodosByUserIdRequest, GetTodosResponse, Todo,
    TodoQueue, TodoResponse, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TodoServiceError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The worker answered with `success = false`.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

#[derive(Clone)]
pub struct TodoService {
    client: Arc<RpcClient>,
    timeout: Option<Duration>,
}

impl TodoService {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Use `timeout` for every call instead of the client default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn get_todos_by_user(&self, user_id: UserId) -> Result<Vec<Todo>, TodoServiceError> {
        let request = GetTodosByUserIdRequest { user_id };
        let response: GetTodosResponse = self
            .client
            .send(&request, TodoQueue::GetByUser.queue_name(), self.timeout)
            .await?;

        if !response.is_success() {
            return Err(rejected(&response, "Failed to get todos"));
        }
        Ok(response.todos)
    }

    pub async fn create_todo(&self, todo: Todo) -> Result<Todo, TodoServiceError> {
        let request = CreateTodoRequest { todo };
        let response: CreateTodoResponse = self
            .client
            .send(&request, TodoQueue::Create.queue_name(), self.timeout)
            .await?;

        match response.created_todo {
            Some(created) if response.success => Ok(created),
            _ => Err(rejected(&response, "Failed to create todo")),
        }
    }
}

fn rejected<R: TodoResponse>(response: &R, fallback: &str) -> TodoServiceError {
    TodoServiceError::Rejected(response.error_message().unwrap_or(fallback).to_string())
}
