//! Adapter implementations for task dispatch ports.

pub mod http;
pub mod keys;
mod keyspace_repository;
pub mod memory;
pub mod postgres;

pub use keyspace_repository::{DEFAULT_TASK_TTL, KeyspaceTaskRepository, RepositorySettings};
