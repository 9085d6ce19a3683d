//! Scheduler port: the two operations the dispatch pipeline depends on.

use crate::task::domain::{
    JobId, ServiceName, TaskId, TaskParameters, TaskPriority, TaskRecord, UserId,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Payload handed to the scheduler when dispatching a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitRequest {
    /// Task being dispatched.
    pub task_id: TaskId,
    /// Owning service.
    pub service: ServiceName,
    /// Submitting user.
    pub user_id: UserId,
    /// Submission parameters.
    pub parameters: TaskParameters,
    /// Requested priority.
    pub priority: TaskPriority,
}

impl SubmitRequest {
    /// Builds a submit payload from a persisted record.
    #[must_use]
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id().clone(),
            service: record.service().clone(),
            user_id: record.user_id().clone(),
            parameters: record.parameters().clone(),
            priority: record.priority(),
        }
    }
}

/// Payload handed to the scheduler when cancelling a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelRequest {
    /// Task being cancelled.
    pub task_id: TaskId,
    /// Owning service.
    pub service: ServiceName,
    /// Submitting user.
    pub user_id: UserId,
}

impl CancelRequest {
    /// Builds a cancel payload from a persisted record.
    #[must_use]
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id().clone(),
            service: record.service().clone(),
            user_id: record.user_id().clone(),
        }
    }
}

/// Scheduler acknowledgement of a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Job identifier assigned by the scheduler, when it returned one.
    pub job_id: Option<JobId>,
}

impl SubmitReceipt {
    /// Creates a receipt carrying a job identifier.
    #[must_use]
    pub const fn with_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
        }
    }
}

/// Client for the downstream execution scheduler.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Hands a task to the scheduler.
    async fn submit(&self, request: &SubmitRequest) -> SchedulerResult<SubmitReceipt>;

    /// Asks the scheduler to stop a task.
    async fn cancel(&self, request: &CancelRequest) -> SchedulerResult<()>;
}

/// Errors returned by scheduler clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler could not be reached.
    #[error("scheduler unavailable at {url}: {message}")]
    Unavailable {
        /// Endpoint that was called.
        url: String,
        /// Transport error description.
        message: String,
    },

    /// The scheduler answered with a non-success status.
    #[error("scheduler at {url} returned {status}: {body}")]
    Rejected {
        /// Endpoint that was called.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The call did not complete within the request timeout.
    #[error("scheduler call timed out after {after:?}")]
    Timeout {
        /// Elapsed budget.
        after: Duration,
    },

    /// The client could not be constructed.
    #[error("invalid scheduler configuration: {0}")]
    Configuration(String),
}
