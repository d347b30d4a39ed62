//! # Todo Message Bodies
//!
//! Request and response bodies exchanged between the RPC client and the
//! worker, plus the queue names each request type travels on.
//!
//! ## Design Rules
//!
//! - Bodies are JSON (camelCase) and carry no routing information; the
//!   correlation id and reply destination live in the envelope properties.
//! - Every response carries `success` and an optional `error_message`, so an
//!   application failure is still a well-formed reply.

use crate::entities::{Todo, UserId};
use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dead-letter exchange shared by every todo queue.
pub const DEAD_LETTER_EXCHANGE: &str = "todo.deadletter";

/// Suffix appended to a main queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = ".deadletter";

// =============================================================================
// REQUEST TYPES / QUEUES
// =============================================================================

/// The request types served by the worker, one main queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TodoQueue {
    /// List todos owned by a user.
    GetByUser,
    /// Create a todo.
    Create,
}

impl TodoQueue {
    /// All request types, in declaration order.
    pub const ALL: [TodoQueue; 2] = [TodoQueue::GetByUser, TodoQueue::Create];

    /// Main queue name; also the dead-letter routing key.
    #[must_use]
    pub fn queue_name(self) -> &'static str {
        match self {
            TodoQueue::GetByUser => "todo.get_by_user",
            TodoQueue::Create => "todo.create",
        }
    }

    /// Dead-letter queue name.
    #[must_use]
    pub fn dead_letter_queue(self) -> String {
        format!("{}{}", self.queue_name(), DEAD_LETTER_SUFFIX)
    }
}

impl fmt::Display for TodoQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Structural checks a decoded request must pass before it is handled.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn check_user_id(user_id: UserId) -> Result<(), ValidationError> {
    if user_id <= 0 {
        return Err(ValidationError::InvalidUserId(user_id));
    }
    Ok(())
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Request for every todo owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTodosByUserIdRequest {
    pub user_id: UserId,
}

impl Validate for GetTodosByUserIdRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_user_id(self.user_id)
    }
}

/// Request to store a new todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodoRequest {
    pub todo: Todo,
}

impl Validate for CreateTodoRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_user_id(self.todo.user_id)
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Common shape of every todo response body.
pub trait TodoResponse: Sized {
    /// Whether the handler succeeded.
    fn is_success(&self) -> bool;

    /// Failure description, when `is_success` is false.
    fn error_message(&self) -> Option<&str>;

    /// Build a failed response carrying `message`.
    fn failure(message: impl Into<String>) -> Self;
}

/// Response to [`GetTodosByUserIdRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTodosResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub todos: Vec<Todo>,
}

impl GetTodosResponse {
    #[must_use]
    pub fn ok(todos: Vec<Todo>) -> Self {
        Self {
            success: true,
            error_message: None,
            todos,
        }
    }
}

impl TodoResponse for GetTodosResponse {
    fn is_success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            todos: Vec::new(),
        }
    }
}

/// Response to [`CreateTodoRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodoResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_todo: Option<Todo>,
}

impl CreateTodoResponse {
    #[must_use]
    pub fn ok(created: Todo) -> Self {
        Self {
            success: true,
            error_message: None,
            created_todo: Some(created),
        }
    }
}

impl TodoResponse for CreateTodoResponse {
    fn is_success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            created_todo: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        assert_eq!(TodoQueue::GetByUser.queue_name(), "todo.get_by_user");
        assert_eq!(TodoQueue::Create.queue_name(), "todo.create");
        assert_eq!(
            TodoQueue::Create.dead_letter_queue(),
            "todo.create.deadletter"
        );
    }

    #[test]
    fn test_get_request_rejects_non_positive_user() {
        assert!(GetTodosByUserIdRequest { user_id: 42 }.validate().is_ok());
        assert_eq!(
            GetTodosByUserIdRequest { user_id: 0 }.validate(),
            Err(ValidationError::InvalidUserId(0))
        );
        assert!(GetTodosByUserIdRequest { user_id: -1 }.validate().is_err());
    }

    #[test]
    fn test_create_request_validates_owner() {
        let ok = CreateTodoRequest {
            todo: Todo::new(5, "x"),
        };
        assert!(ok.validate().is_ok());

        let bad = CreateTodoRequest {
            todo: Todo::new(0, "x"),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_get_request_wire_format() {
        let request: GetTodosByUserIdRequest = serde_json::from_str(r#"{"userId":42}"#).unwrap();
        assert_eq!(request.user_id, 42);
    }

    #[test]
    fn test_failure_response_shape() {
        let response = GetTodosResponse::failure("Failed to retrieve todos");
        assert!(!response.is_success());
        assert_eq!(response.error_message(), Some("Failed to retrieve todos"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorMessage"], "Failed to retrieve todos");
    }

    #[test]
    fn test_success_response_omits_error() {
        let response = CreateTodoResponse::ok(Todo::new(1, "a"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("errorMessage").is_none());
        assert_eq!(json["createdTodo"]["userId"], 1);
    }
}
