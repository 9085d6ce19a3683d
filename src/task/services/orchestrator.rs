//! Task orchestration: scoping, id assignment, persistence and enqueueing.

use crate::task::{
    domain::{
        NewTask, ResultUpdate, ServiceName, TaskDomainError, TaskId, TaskParameters, TaskPriority,
        TaskRecord, TaskStatus, TaskTimezone, UserId,
    },
    ports::{
        CancelRequest, DispatchEvent, EventPublisher, PublishError, SubmitRequest, TaskRepository,
        TaskRepositoryError,
    },
};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Request payload for submitting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTaskRequest {
    service: String,
    user_id: String,
    parameters: TaskParameters,
    priority: TaskPriority,
}

impl SubmitTaskRequest {
    /// Creates a request with no parameters and default priority.
    #[must_use]
    pub fn new(service: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user_id: user_id.into(),
            parameters: TaskParameters::new(),
            priority: TaskPriority::default(),
        }
    }

    /// Sets submission parameters.
    #[must_use]
    pub fn with_parameters(
        mut self,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Visibility a caller has over tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskScope {
    /// An end user, limited to their own tasks in one service.
    User {
        /// Service the caller acts in.
        service: ServiceName,
        /// Calling user.
        user_id: UserId,
    },
    /// An operator limited to one service.
    Service {
        /// Service the operator manages.
        service: ServiceName,
    },
    /// An operator with access to every task.
    Operator,
}

impl TaskScope {
    /// Returns `true` when the scope covers `record`.
    #[must_use]
    pub fn permits(&self, record: &TaskRecord) -> bool {
        match self {
            Self::User { service, user_id } => {
                record.service() == service && record.user_id() == user_id
            }
            Self::Service { service } => record.service() == service,
            Self::Operator => true,
        }
    }
}

/// Terminal outcome reported by the executing side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Execution finished successfully.
    Completed,
    /// Execution failed.
    Failed {
        /// Failure description recorded in the task log.
        reason: String,
    },
}

/// Service-level errors for task orchestration.
#[derive(Debug, Error)]
pub enum TaskServiceError {
    /// Input validation failed.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),

    /// The task does not exist or lies outside the caller's scope.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task already reached a terminal status.
    #[error("task {task_id} is already {status}")]
    AlreadyTerminal {
        /// Task that was targeted.
        task_id: TaskId,
        /// Its terminal status.
        status: TaskStatus,
    },

    /// The dispatch queue refused the event.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Repository operation failed.
    #[error(transparent)]
    Repository(TaskRepositoryError),
}

impl From<TaskRepositoryError> for TaskServiceError {
    fn from(err: TaskRepositoryError) -> Self {
        match err {
            TaskRepositoryError::NotFound(task_id) => Self::NotFound(task_id),
            other => Self::Repository(other),
        }
    }
}

/// Result type for task orchestration operations.
pub type TaskServiceResult<T> = Result<T, TaskServiceError>;

/// Entry point used by the API layer.
///
/// Submission and cancellation return as soon as the event is queued; the
/// dispatch outcome only becomes visible through later reads.
pub struct TaskService<R, P, C = DefaultClock> {
    repository: Arc<R>,
    publisher: Arc<P>,
    clock: Arc<C>,
    timezone: TaskTimezone,
}

impl<R, P, C> Clone for TaskService<R, P, C> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            publisher: Arc::clone(&self.publisher),
            clock: Arc::clone(&self.clock),
            timezone: self.timezone,
        }
    }
}

impl<R, P, C> TaskService<R, P, C>
where
    R: TaskRepository,
    P: EventPublisher,
    C: Clock + Send + Sync,
{
    /// Creates a task service.
    #[must_use]
    pub const fn new(
        repository: Arc<R>,
        publisher: Arc<P>,
        clock: Arc<C>,
        timezone: TaskTimezone,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            timezone,
        }
    }

    /// Persists a new `Pending` task and queues its submission.
    ///
    /// If the queue is already closed the task is marked failed and returned.
    /// Once the task is persisted the caller never receives an error; a store
    /// failure while marking it failed leaves the `Pending` record in place.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError`] when validation fails or the task cannot
    /// be persisted.
    pub async fn submit(&self, request: SubmitTaskRequest) -> TaskServiceResult<TaskRecord> {
        let service = ServiceName::new(request.service)?;
        let user_id = UserId::new(request.user_id)?;
        let task_id = self.repository.next_task_id().await?;

        let record = TaskRecord::new(
            NewTask::new(task_id, service, user_id)
                .with_parameters(request.parameters)
                .with_priority(request.priority),
            self.timezone.now(&*self.clock),
        );
        self.repository.save(&record).await?;
        info!(
            task_id = %record.task_id(),
            service = %record.service(),
            user_id = %record.user_id(),
            "task submitted"
        );

        let event = DispatchEvent::Submit(SubmitRequest::from_record(&record));
        if let Err(err) = self.publisher.publish(event).await {
            error!(task_id = %record.task_id(), error = %err, "submission could not be queued");
            return Ok(self.mark_unqueued(record, &err).await);
        }
        Ok(record)
    }

    /// Fails a persisted task whose submission never reached the queue.
    ///
    /// A store error here is logged and the persisted record returned as is.
    async fn mark_unqueued(&self, record: TaskRecord, err: &PublishError) -> TaskRecord {
        let task_id = record.task_id();
        let reason = format!("Dispatch not queued: {err}");
        let marked = match self
            .repository
            .set_status(task_id, TaskStatus::Dispatching, None)
            .await
        {
            Ok(_) => {
                self.repository
                    .set_status(task_id, TaskStatus::Failed, Some(&reason))
                    .await
            }
            Err(store_err) => Err(store_err),
        };
        match marked {
            Ok(failed) => failed,
            Err(store_err) => {
                error!(%task_id, error = %store_err, "unqueued task could not be marked failed");
                record
            }
        }
    }

    /// Loads a task visible to `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] when the task is missing or
    /// outside the scope.
    pub async fn get_task(&self, scope: &TaskScope, task_id: &TaskId) -> TaskServiceResult<TaskRecord> {
        let record = self.repository.get(task_id).await?;
        if scope.permits(&record) {
            Ok(record)
        } else {
            Err(TaskServiceError::NotFound(task_id.clone()))
        }
    }

    /// Lists one user's tasks in a service.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::Repository`] when the store fails.
    pub async fn list_user_tasks(
        &self,
        service: &ServiceName,
        user_id: &UserId,
    ) -> TaskServiceResult<Vec<TaskRecord>> {
        Ok(self
            .repository
            .list_by_service_and_user(service, user_id)
            .await?)
    }

    /// Lists every task in a service.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::Repository`] when the store fails.
    pub async fn list_service_tasks(
        &self,
        service: &ServiceName,
    ) -> TaskServiceResult<Vec<TaskRecord>> {
        Ok(self.repository.list_by_service(service).await?)
    }

    /// Lists every live task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::Repository`] when the store fails.
    pub async fn list_all_tasks(&self) -> TaskServiceResult<Vec<TaskRecord>> {
        Ok(self.repository.list_all().await?)
    }

    /// Lists users holding tasks in a service.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::Repository`] when the store fails.
    pub async fn list_service_users(&self, service: &ServiceName) -> TaskServiceResult<Vec<UserId>> {
        Ok(self.repository.list_users_by_service(service).await?)
    }

    /// Queues a cancellation and returns the task as it stands.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] for missing or out-of-scope
    /// tasks, [`TaskServiceError::AlreadyTerminal`] for finished tasks and
    /// [`TaskServiceError::Publish`] when the queue is closed.
    pub async fn cancel_task(
        &self,
        scope: &TaskScope,
        task_id: &TaskId,
    ) -> TaskServiceResult<TaskRecord> {
        let record = self.get_task(scope, task_id).await?;
        if record.status().is_terminal() {
            return Err(TaskServiceError::AlreadyTerminal {
                task_id: task_id.clone(),
                status: record.status(),
            });
        }
        self.publisher
            .publish(DispatchEvent::Cancel(CancelRequest::from_record(&record)))
            .await?;
        info!(%task_id, "task cancellation queued");
        Ok(record)
    }

    /// Deletes task metadata without contacting the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] for missing or out-of-scope
    /// tasks.
    pub async fn delete_task(
        &self,
        scope: &TaskScope,
        task_id: &TaskId,
    ) -> TaskServiceResult<TaskRecord> {
        let record = self.get_task(scope, task_id).await?;
        self.repository.delete(task_id).await?;
        Ok(record)
    }

    /// Records the terminal outcome reported by the executor.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::Repository`] wrapping
    /// [`TaskRepositoryError::InvalidTransition`] when the task is not
    /// running.
    pub async fn record_outcome(
        &self,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> TaskServiceResult<TaskRecord> {
        let (status, message) = match outcome {
            TaskOutcome::Completed => (TaskStatus::Completed, "Task completed".to_owned()),
            TaskOutcome::Failed { reason } => (TaskStatus::Failed, reason),
        };
        let record = self
            .repository
            .set_status(task_id, status, Some(&message))
            .await?;
        info!(%task_id, %status, "task outcome recorded");
        Ok(record)
    }

    /// Appends an executor log line.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] when the task is missing.
    pub async fn append_log(&self, task_id: &TaskId, message: &str) -> TaskServiceResult<TaskRecord> {
        Ok(self.repository.append_log(task_id, message).await?)
    }

    /// Merges executor-reported result fields.
    ///
    /// # Errors
    ///
    /// Returns [`TaskServiceError::NotFound`] when the task is missing.
    pub async fn update_result(
        &self,
        task_id: &TaskId,
        update: ResultUpdate,
    ) -> TaskServiceResult<TaskRecord> {
        Ok(self.repository.update_result(task_id, update).await?)
    }
}
