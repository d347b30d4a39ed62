use super::{HandlerOutcome, RequestHandler};
use crate::ports::TodoRepository;
use async_trait::async_trait;
use shared_types::{CreateTodoRequest, CreateTodoResponse, TodoQueue};
use std::sync::Arc;
use tracing::{error, info};

pub struct CreateTodoHandler {
    repository: Arc<dyn TodoRepository>,
}

impl CreateTodoHandler {
    pub fn new(repository: Arc<dyn TodoRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl RequestHandler for CreateTodoHandler {
    type Request = CreateTodoRequest;
    type Response = CreateTodoResponse;

    fn queue(&self) -> TodoQueue {
        TodoQueue::Create
    }

    async fn handle(&self, request: CreateTodoRequest) -> HandlerOutcome<CreateTodoResponse> {
        let user_id = request.todo.user_id;
        info!(user_id = user_id, "Received create todo request");

        match self.repository.create(request.todo).await {
            Ok(created) => {
                info!(user_id = user_id, todo_id = created.id, "Todo created");
                HandlerOutcome::Ok(CreateTodoResponse::ok(created))
            }
            Err(e) => {
                error!(user_id = user_id, error = %e, "Failed to create todo");
                HandlerOutcome::ApplicationFailure("Failed to create todo".to_string())
            }
        }
    }
}
