//! # Error Types
//!
//! Defines error types shared by the client and the worker.

use crate::entities::UserId;
use thiserror::Error;

/// A decoded request is structurally invalid. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The body could not be decoded at all.
    #[error("Malformed body: {0}")]
    Malformed(String),

    /// User identifiers must be strictly positive.
    #[error("Invalid user id: {0} (must be positive)")]
    InvalidUserId(UserId),
}
