//! Worker services: the per-delivery dispatcher and the per-queue consumer.

pub mod consumer;
pub mod dispatch;

pub use consumer::QueueConsumer;
pub use dispatch::{DeadLetterReason, DispatchOutcome, Dispatcher};
