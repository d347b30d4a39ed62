//! # Todo Relay Test Suite
//!
//! End-to-end flows across the broker, the RPC client and the worker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs            # Shared fixtures and fault-injecting transports
//!     ├── rpc_flows.rs          # Request/reply, timeouts, late replies
//!     └── dead_letter_flows.rs  # Validation, retries, dead-lettering
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p todo-tests
//! cargo test -p todo-tests integration::dead_letter_flows::
//! ```

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

pub mod integration;
