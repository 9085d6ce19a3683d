//! In-memory adapters for tests and single-process deployments.

mod clock;
mod keyspace;
mod scheduler;

pub use clock::ManualClock;
pub use keyspace::InMemoryKeyspace;
pub use scheduler::{InMemorySchedulerClient, SchedulerCall};

use super::{KeyspaceTaskRepository, RepositorySettings};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;

/// Task repository over a process-local keyspace.
pub type InMemoryTaskRepository<C = DefaultClock> =
    KeyspaceTaskRepository<InMemoryKeyspace<C>, C>;

impl<C> InMemoryTaskRepository<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a repository whose keyspace shares `clock` for expiry.
    #[must_use]
    pub fn in_memory(clock: Arc<C>, settings: RepositorySettings) -> Self {
        Self::new(
            InMemoryKeyspace::new(Arc::clone(&clock)),
            clock,
            settings,
        )
    }
}
