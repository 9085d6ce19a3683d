//! Port contracts for task dispatch tracking.
//!
//! Ports define infrastructure-agnostic interfaces used by task services and
//! the event processor.

pub mod events;
pub mod keyspace;
pub mod repository;
pub mod scheduler;

pub use events::{DispatchEvent, DispatchKind, EventPublisher, PublishError};
pub use keyspace::{Keyspace, KeyspaceError, KeyspaceResult};
pub use repository::{TaskRepository, TaskRepositoryError, TaskRepositoryResult};
pub use scheduler::{
    CancelRequest, SchedulerClient, SchedulerError, SchedulerResult, SubmitReceipt, SubmitRequest,
};
