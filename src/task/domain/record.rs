//! Task record aggregate and its result payload.

use super::{
    JobId, LogEntry, ParseTaskPriorityError, ServiceName, TaskDomainError, TaskId, TaskStatus,
    UserId,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Submission parameters forwarded verbatim to the scheduler.
pub type TaskParameters = BTreeMap<String, String>;

/// Scheduling priority requested at submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Preferential placement.
    High,
    /// Default placement.
    #[default]
    Low,
}

impl TaskPriority {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl TryFrom<&str> for TaskPriority {
    type Error = ParseTaskPriorityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            _ => Err(ParseTaskPriorityError(value.to_owned())),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result attached to a task by its executor.
///
/// Each field is written independently; updating one never clears the other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Execution-status snapshot reported by the executor.
    pub pod_status: Option<String>,
    /// Combined output text of the launched job.
    pub launcher_output: Option<String>,
}

/// Partial result update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultUpdate {
    pod_status: Option<String>,
    launcher_output: Option<String>,
}

impl ResultUpdate {
    /// Creates an empty update.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pod_status: None,
            launcher_output: None,
        }
    }

    /// Sets the execution-status snapshot.
    #[must_use]
    pub fn with_pod_status(mut self, pod_status: impl Into<String>) -> Self {
        self.pod_status = Some(pod_status.into());
        self
    }

    /// Sets the combined output text.
    #[must_use]
    pub fn with_launcher_output(mut self, launcher_output: impl Into<String>) -> Self {
        self.launcher_output = Some(launcher_output.into());
        self
    }

    /// Returns `true` when the update carries no fields.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pod_status.is_none() && self.launcher_output.is_none()
    }
}

/// Parameter object for creating a task record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    task_id: TaskId,
    service: ServiceName,
    user_id: UserId,
    parameters: TaskParameters,
    priority: TaskPriority,
}

impl NewTask {
    /// Creates a submission with no parameters and default priority.
    #[must_use]
    pub fn new(task_id: TaskId, service: ServiceName, user_id: UserId) -> Self {
        Self {
            task_id,
            service,
            user_id,
            parameters: TaskParameters::new(),
            priority: TaskPriority::default(),
        }
    }

    /// Sets submission parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: TaskParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// One user-submitted unit of work tracked through its dispatch lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    task_id: TaskId,
    service: ServiceName,
    user_id: UserId,
    status: TaskStatus,
    #[serde(default)]
    priority: TaskPriority,
    #[serde(default)]
    parameters: TaskParameters,
    #[serde(default)]
    jobs: Vec<JobId>,
    #[serde(default)]
    result: Option<TaskResult>,
    #[serde(default)]
    logs: Vec<LogEntry>,
    created_at: DateTime<FixedOffset>,
    updated_at: DateTime<FixedOffset>,
}

impl TaskRecord {
    /// Creates a `Pending` record.
    #[must_use]
    pub fn new(task: NewTask, at: DateTime<FixedOffset>) -> Self {
        let NewTask {
            task_id,
            service,
            user_id,
            parameters,
            priority,
        } = task;
        Self {
            task_id,
            service,
            user_id,
            status: TaskStatus::Pending,
            priority,
            parameters,
            jobs: Vec::new(),
            result: None,
            logs: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Returns the owning service.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the submitting user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the scheduling priority.
    #[must_use]
    pub const fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Returns the submission parameters.
    #[must_use]
    pub const fn parameters(&self) -> &TaskParameters {
        &self.parameters
    }

    /// Returns scheduler job identifiers in the order they were assigned.
    #[must_use]
    pub fn jobs(&self) -> &[JobId] {
        &self.jobs
    }

    /// Returns the result payload, if any field has been set.
    #[must_use]
    pub const fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// Returns log lines in append order.
    #[must_use]
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<FixedOffset> {
        self.created_at
    }

    /// Returns the latest mutation timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<FixedOffset> {
        self.updated_at
    }

    /// Moves the record to `target` when the state machine allows it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidTransition`] when the transition is
    /// not permitted; the record is left unchanged.
    pub fn transition_to(
        &mut self,
        target: TaskStatus,
        at: DateTime<FixedOffset>,
    ) -> Result<(), TaskDomainError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskDomainError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = at;
        Ok(())
    }

    /// Appends a log line stamped with `at`.
    pub fn log(&mut self, message: impl AsRef<str>, at: DateTime<FixedOffset>) {
        self.logs.push(LogEntry::new(at, message));
        self.updated_at = at;
    }

    /// Appends a scheduler job identifier.
    pub fn push_job(&mut self, job_id: JobId, at: DateTime<FixedOffset>) {
        self.jobs.push(job_id);
        self.updated_at = at;
    }

    /// Merges the provided result fields, leaving absent fields untouched.
    pub fn merge_result(&mut self, update: ResultUpdate, at: DateTime<FixedOffset>) {
        if update.is_empty() {
            return;
        }
        let result = self.result.get_or_insert_with(TaskResult::default);
        if let Some(pod_status) = update.pod_status {
            result.pod_status = Some(pod_status);
        }
        if let Some(launcher_output) = update.launcher_output {
            result.launcher_output = Some(launcher_output);
        }
        self.updated_at = at;
    }
}
