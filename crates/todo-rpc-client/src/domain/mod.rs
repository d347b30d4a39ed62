//! Domain layer: correlation identifiers and the table of pending calls.

pub mod correlation;
pub mod pending;

pub use correlation::CorrelationId;
pub use pending::{CorrelationTable, PendingReply, PendingStats};
