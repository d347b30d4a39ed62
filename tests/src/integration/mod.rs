//! Cross-crate integration flows.

pub mod dead_letter_flows;
pub mod rpc_flows;
pub mod support;
