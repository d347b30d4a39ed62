use super::{HandlerOutcome, RequestHandler};
use crate::ports::TodoRepository;
use async_trait::async_trait;
use shared_types::{GetTodosByUserIdRequest, GetTodosResponse, TodoQueue};
use std::sync::Arc;
use tracing::{error, info};

pub struct GetTodosHandler {
    repository: Arc<dyn TodoRepository>,
}

impl GetTodosHandler {
    pub fn new(repository: Arc<dyn TodoRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl RequestHandler for GetTodosHandler {
    type Request = GetTodosByUserIdRequest;
    type Response = GetTodosResponse;

    fn queue(&self) -> TodoQueue {
        TodoQueue::GetByUser
    }

    async fn handle(&self, request: GetTodosByUserIdRequest) -> HandlerOutcome<GetTodosResponse> {
        info!(user_id = request.user_id, "Received get todos request");

        match self.repository.list_by_owner(request.user_id).await {
            Ok(todos) => HandlerOutcome::Ok(GetTodosResponse::ok(todos)),
            Err(e) => {
                error!(user_id = request.user_id, error = %e, "Failed to get todos");
                HandlerOutcome::ApplicationFailure("Failed to retrieve todos".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTodoRepository;
    use crate::testing::UnavailableRepository;
    use shared_types::{Todo, TodoResponse};

    #[tokio::test]
    async fn test_returns_owned_todos() {
        let repository = Arc::new(InMemoryTodoRepository::new());
        repository.create(Todo::new(42, "write tests")).await.unwrap();
        repository.create(Todo::new(7, "not mine")).await.unwrap();

        let handler = GetTodosHandler::new(repository);
        let response = handler
            .handle(GetTodosByUserIdRequest { user_id: 42 })
            .await
            .into_response();

        assert!(response.is_success());
        assert_eq!(response.todos.len(), 1);
        assert_eq!(response.todos[0].title, "write tests");
    }

    #[tokio::test]
    async fn test_repository_failure_is_application_failure() {
        let handler = GetTodosHandler::new(Arc::new(UnavailableRepository));
        let outcome = handler.handle(GetTodosByUserIdRequest { user_id: 42 }).await;
        assert_eq!(
            outcome,
            HandlerOutcome::ApplicationFailure("Failed to retrieve todos".into())
        );

        let response = outcome.into_response();
        assert!(!response.is_success());
        assert_eq!(response.error_message(), Some("Failed to retrieve todos"));
        assert!(response.todos.is_empty());
    }
}
