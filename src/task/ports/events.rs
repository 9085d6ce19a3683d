//! Dispatch events and the publisher port used by the orchestrator.

use super::{CancelRequest, SubmitRequest};
use crate::task::domain::TaskId;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Kind of dispatch work carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// Hand the task to the scheduler.
    Submit,
    /// Ask the scheduler to stop the task.
    Cancel,
}

impl DispatchKind {
    /// Returns the lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work queued for the event processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Submit the task to the scheduler.
    Submit(SubmitRequest),
    /// Cancel the task at the scheduler.
    Cancel(CancelRequest),
}

impl DispatchEvent {
    /// Returns the task the event targets.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Submit(request) => &request.task_id,
            Self::Cancel(request) => &request.task_id,
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> DispatchKind {
        match self {
            Self::Submit(_) => DispatchKind::Submit,
            Self::Cancel(_) => DispatchKind::Cancel,
        }
    }
}

/// Queue-side contract consumed by the task orchestrator.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Enqueues an event, waiting for capacity when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ShuttingDown`] once shutdown has begun.
    async fn publish(&self, event: DispatchEvent) -> Result<(), PublishError>;
}

/// Errors returned when enqueueing a dispatch event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The processor no longer accepts events.
    #[error("event processor is shutting down; {kind} event for task {task_id} rejected")]
    ShuttingDown {
        /// Task the rejected event targeted.
        task_id: TaskId,
        /// Kind of the rejected event.
        kind: DispatchKind,
    },
}
