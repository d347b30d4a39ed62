//! Adapters implementing the worker's outbound ports.

pub mod memory_repository;

pub use memory_repository::InMemoryTodoRepository;
