//! Repository port for task persistence, indexed lookup and mutation.

use super::KeyspaceError;
use crate::task::domain::{
    JobId, ResultUpdate, ServiceName, TaskDomainError, TaskId, TaskRecord, TaskStatus, UserId,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for task repository operations.
pub type TaskRepositoryResult<T> = Result<T, TaskRepositoryError>;

/// Task persistence contract.
///
/// Mutating operations are read-modify-write against the backing store with
/// no optimistic-concurrency check: concurrent writers on the same task race
/// and the last `save` wins.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Returns a fresh, strictly increasing task identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::BackingStoreUnavailable`] when the
    /// shared counter cannot be incremented.
    async fn next_task_id(&self) -> TaskRepositoryResult<TaskId>;

    /// Upserts the record and adds it to every index, refreshing the
    /// retention window on each key touched.
    ///
    /// The sub-writes are not atomic; readers may briefly observe an index
    /// entry without its primary record or the reverse.
    async fn save(&self, record: &TaskRecord) -> TaskRepositoryResult<()>;

    /// Loads a live record.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when no live record exists.
    async fn get(&self, task_id: &TaskId) -> TaskRepositoryResult<TaskRecord>;

    /// Removes the record and prunes it from every index.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when no live record exists.
    async fn delete(&self, task_id: &TaskId) -> TaskRepositoryResult<()>;

    /// Returns live records for `ids`, silently omitting missing ones.
    async fn list_by_ids(&self, ids: &[TaskId]) -> TaskRepositoryResult<Vec<TaskRecord>>;

    /// Returns every live record referenced by the global index.
    async fn list_all(&self) -> TaskRepositoryResult<Vec<TaskRecord>>;

    /// Returns live records owned by `service`.
    async fn list_by_service(&self, service: &ServiceName)
    -> TaskRepositoryResult<Vec<TaskRecord>>;

    /// Returns live records owned by `service` and submitted by `user_id`.
    async fn list_by_service_and_user(
        &self,
        service: &ServiceName,
        user_id: &UserId,
    ) -> TaskRepositoryResult<Vec<TaskRecord>>;

    /// Returns users holding at least one indexed task in `service`.
    async fn list_users_by_service(
        &self,
        service: &ServiceName,
    ) -> TaskRepositoryResult<Vec<UserId>>;

    /// Validates and applies a status transition, appending `log_entry` when
    /// given.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::InvalidTransition`] when the state
    /// machine rejects the move; nothing is written in that case.
    async fn set_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        log_entry: Option<&str>,
    ) -> TaskRepositoryResult<TaskRecord>;

    /// Appends a timestamped log line.
    async fn append_log(&self, task_id: &TaskId, message: &str)
    -> TaskRepositoryResult<TaskRecord>;

    /// Appends a scheduler job identifier.
    async fn append_job(&self, task_id: &TaskId, job_id: JobId)
    -> TaskRepositoryResult<TaskRecord>;

    /// Merges only the provided result fields.
    async fn update_result(
        &self,
        task_id: &TaskId,
        update: ResultUpdate,
    ) -> TaskRepositoryResult<TaskRecord>;

    /// Round-trips the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::BackingStoreUnavailable`] when the
    /// store cannot be reached.
    async fn health_check(&self) -> TaskRepositoryResult<()>;
}

/// Errors returned by task repository implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskRepositoryError {
    /// No live record exists for the identifier.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The status state machine rejected the requested move.
    #[error("invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose transition was rejected.
        task_id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// The backing store could not be reached.
    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure, including undecodable records.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}

impl From<KeyspaceError> for TaskRepositoryError {
    fn from(err: KeyspaceError) -> Self {
        match err {
            KeyspaceError::Unavailable(source) => Self::BackingStoreUnavailable(source),
            KeyspaceError::Backend(source) => Self::Persistence(source),
        }
    }
}

impl From<TaskDomainError> for TaskRepositoryError {
    fn from(err: TaskDomainError) -> Self {
        match err {
            TaskDomainError::InvalidTransition { task_id, from, to } => {
                Self::InvalidTransition { task_id, from, to }
            }
            other => Self::persistence(other),
        }
    }
}
