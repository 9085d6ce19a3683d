//! `PostgreSQL` adapters for durable task storage.

mod keyspace;
mod models;
mod schema;

pub use keyspace::{PostgresKeyspace, TaskPgPool, connect_pool};

use super::KeyspaceTaskRepository;
use mockable::DefaultClock;

/// Task repository over the shared `PostgreSQL` keyspace.
pub type PostgresTaskRepository<C = DefaultClock> =
    KeyspaceTaskRepository<PostgresKeyspace<C>, C>;
