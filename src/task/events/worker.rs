//! Per-event dispatch handling.

use crate::task::{
    domain::{TaskId, TaskStatus},
    ports::{
        CancelRequest, DispatchEvent, SchedulerClient, SchedulerError, SchedulerResult,
        SubmitReceipt, SubmitRequest, TaskRepository, TaskRepositoryError,
    },
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Log line recorded when a worker picks up a submission.
pub const DISPATCHING_LOG: &str = "Dispatching to scheduler";

/// Log line recorded when the scheduler acknowledges a cancellation.
pub const CANCELLED_LOG: &str = "Task cancelled";

/// What a worker did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The scheduler accepted the submission and the task is running.
    Dispatched,
    /// The submission failed and the task was marked failed.
    DispatchFailed,
    /// The scheduler acknowledged the cancellation and the task was cancelled.
    Cancelled,
    /// The cancellation failed; the task kept its status.
    CancelFailed,
    /// The event no longer applied to the task's current state.
    Skipped,
    /// The repository failed while recording the outcome.
    StoreFailed,
}

/// Handles dispatch events against a repository and a scheduler.
pub struct DispatchWorker<R, S: ?Sized> {
    id: usize,
    repository: Arc<R>,
    scheduler: Arc<S>,
    request_timeout: Duration,
}

impl<R, S: ?Sized> Clone for DispatchWorker<R, S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            repository: Arc::clone(&self.repository),
            scheduler: Arc::clone(&self.scheduler),
            request_timeout: self.request_timeout,
        }
    }
}

impl<R, S> DispatchWorker<R, S>
where
    R: TaskRepository,
    S: SchedulerClient + ?Sized,
{
    /// Creates a worker bounding every scheduler call by `request_timeout`.
    #[must_use]
    pub const fn new(repository: Arc<R>, scheduler: Arc<S>, request_timeout: Duration) -> Self {
        Self {
            id: 0,
            repository,
            scheduler,
            request_timeout,
        }
    }

    /// Returns a copy of this worker labelled `id` in logs.
    #[must_use]
    pub fn with_id(&self, id: usize) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    /// Returns the worker label.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Handles one event to completion. Never retries.
    pub async fn handle(&self, event: DispatchEvent) -> DispatchOutcome {
        let task_id = event.task_id().clone();
        let kind = event.kind();
        debug!(worker = self.id, %task_id, event_kind = %kind, "handling dispatch event");
        let outcome = match event {
            DispatchEvent::Submit(request) => self.submit(&request).await,
            DispatchEvent::Cancel(request) => self.cancel(&request).await,
        };
        debug!(worker = self.id, %task_id, event_kind = %kind, ?outcome, "dispatch event handled");
        outcome
    }

    async fn submit(&self, request: &SubmitRequest) -> DispatchOutcome {
        let task_id = &request.task_id;
        if let Err(err) = self
            .repository
            .set_status(task_id, TaskStatus::Dispatching, Some(DISPATCHING_LOG))
            .await
        {
            return self.unapplied(task_id, &err, "submission");
        }

        match self.bounded(self.scheduler.submit(request)).await {
            Ok(receipt) => self.record_accepted(task_id, receipt).await,
            Err(err) => self.record_submit_failure(task_id, &err).await,
        }
    }

    async fn record_accepted(&self, task_id: &TaskId, receipt: SubmitReceipt) -> DispatchOutcome {
        let message = receipt.job_id.as_ref().map_or_else(
            || "Scheduler accepted submission".to_owned(),
            |job_id| format!("Scheduler accepted job {job_id}"),
        );
        if let Some(job_id) = receipt.job_id {
            if let Err(err) = self.repository.append_job(task_id, job_id).await {
                return self.unapplied(task_id, &err, "job recording");
            }
        }

        match self
            .repository
            .set_status(task_id, TaskStatus::Running, Some(&message))
            .await
        {
            Ok(_) => {
                info!(worker = self.id, %task_id, "task dispatched");
                DispatchOutcome::Dispatched
            }
            Err(TaskRepositoryError::InvalidTransition { from, .. }) => {
                warn!(
                    worker = self.id,
                    %task_id,
                    %from,
                    "scheduler accepted a task that already left dispatching"
                );
                DispatchOutcome::Skipped
            }
            Err(err) => self.unapplied(task_id, &err, "running transition"),
        }
    }

    async fn record_submit_failure(&self, task_id: &TaskId, err: &SchedulerError) -> DispatchOutcome {
        error!(worker = self.id, %task_id, error = %err, "task dispatch failed");
        let reason = format!("Dispatch failed: {err}");
        match self
            .repository
            .set_status(task_id, TaskStatus::Failed, Some(&reason))
            .await
        {
            Ok(_) => DispatchOutcome::DispatchFailed,
            Err(store_err) => self.unapplied(task_id, &store_err, "failure transition"),
        }
    }

    async fn cancel(&self, request: &CancelRequest) -> DispatchOutcome {
        let task_id = &request.task_id;
        match self.bounded(self.scheduler.cancel(request)).await {
            Ok(()) => match self
                .repository
                .set_status(task_id, TaskStatus::Cancelled, Some(CANCELLED_LOG))
                .await
            {
                Ok(_) => {
                    info!(worker = self.id, %task_id, "task cancelled");
                    DispatchOutcome::Cancelled
                }
                Err(err) => self.unapplied(task_id, &err, "cancellation"),
            },
            Err(err) => {
                warn!(worker = self.id, %task_id, error = %err, "task cancellation failed");
                let message = format!("Cancellation failed: {err}");
                match self.repository.append_log(task_id, &message).await {
                    Ok(_) => DispatchOutcome::CancelFailed,
                    Err(store_err) => self.unapplied(task_id, &store_err, "cancellation log"),
                }
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = SchedulerResult<T>>) -> SchedulerResult<T> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(SchedulerError::Timeout {
                    after: self.request_timeout,
                })
            })
    }

    /// Classifies a repository error met while applying an event.
    fn unapplied(&self, task_id: &TaskId, err: &TaskRepositoryError, step: &str) -> DispatchOutcome {
        match err {
            TaskRepositoryError::InvalidTransition { from, to, .. } => {
                info!(worker = self.id, %task_id, %from, %to, step, "event no longer applies");
                DispatchOutcome::Skipped
            }
            TaskRepositoryError::NotFound(_) => {
                info!(worker = self.id, %task_id, step, "task vanished before the event applied");
                DispatchOutcome::Skipped
            }
            other => {
                error!(worker = self.id, %task_id, step, error = %other, "failed to record dispatch outcome");
                DispatchOutcome::StoreFailed
            }
        }
    }
}
