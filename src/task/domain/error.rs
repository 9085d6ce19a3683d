//! Error types for task domain validation and parsing.

use super::{TaskId, TaskStatus};
use thiserror::Error;

/// Errors returned while constructing or mutating domain task values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The service name is empty or contains reserved characters.
    #[error("invalid service name '{0}', expected a non-empty value without whitespace or ':'")]
    InvalidServiceName(String),

    /// The user identifier is empty or contains whitespace.
    #[error("invalid user id '{0}', expected a non-empty value without whitespace")]
    InvalidUserId(String),

    /// The task identifier is empty.
    #[error("task id must not be empty")]
    EmptyTaskId,

    /// The scheduler job identifier is empty.
    #[error("job id must not be empty")]
    EmptyJobId,

    /// The requested status transition is not permitted.
    #[error("invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose transition was rejected.
        task_id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing a priority level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task priority: {0}")]
pub struct ParseTaskPriorityError(pub String);

/// Error returned when a persisted log line is not in wire format.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed log entry: {0}")]
pub struct ParseLogEntryError(pub String);
