//! # Request Handlers
//!
//! A handler turns one decoded request into one response. It never fails:
//! repository errors come back as [`HandlerOutcome::ApplicationFailure`],
//! which the dispatcher still replies with and acknowledges.

mod create_todo;
mod get_todos;

pub use create_todo::CreateTodoHandler;
pub use get_todos::GetTodosHandler;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{TodoQueue, TodoResponse, Validate};

/// Application-level result of handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome<R> {
    Ok(R),
    /// The request was understood but could not be served.
    ApplicationFailure(String),
}

impl<R: TodoResponse> HandlerOutcome<R> {
    /// The response body to send back (`success = false` for failures).
    pub fn into_response(self) -> R {
        match self {
            HandlerOutcome::Ok(response) => response,
            HandlerOutcome::ApplicationFailure(message) => R::failure(message),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HandlerOutcome::Ok(_))
    }
}

#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Validate + Send + 'static;
    type Response: Serialize + TodoResponse + Send + 'static;

    /// Queue this handler consumes.
    fn queue(&self) -> TodoQueue;

    async fn handle(&self, request: Self::Request) -> HandlerOutcome<Self::Response>;
}
