//! # Shared Types Crate
//!
//! This crate contains the todo entity, the request/response bodies and the
//! wire envelope shared by the RPC client and the worker.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: queue names and message shapes are defined
//!   once, here.
//! - **Envelope Authority**: correlation ids, reply destinations and retry
//!   counts live in `MessageProperties`, never in a body.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod messaging;

pub use entities::*;
pub use envelope::{
    Envelope, HeaderValue, Headers, MessageProperties, RetryCount, JSON_CONTENT_TYPE,
    RETRY_COUNT_HEADER,
};
pub use errors::*;
pub use messaging::*;
