//! Scripted scheduler client for tests and local runs.

use crate::task::{
    domain::TaskId,
    ports::{
        CancelRequest, SchedulerClient, SchedulerError, SchedulerResult, SubmitReceipt,
        SubmitRequest,
    },
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scheduler call observed by [`InMemorySchedulerClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    /// A submission.
    Submit(SubmitRequest),
    /// A cancellation.
    Cancel(CancelRequest),
}

impl SchedulerCall {
    /// Returns the task the call targeted.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Submit(request) => &request.task_id,
            Self::Cancel(request) => &request.task_id,
        }
    }
}

/// Scheduler stand-in that accepts everything unless scripted otherwise.
///
/// Scripted outcomes are consumed in order per task; once exhausted the
/// client falls back to accepting. Every call is recorded before its outcome
/// is produced.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchedulerClient {
    state: Arc<Mutex<SchedulerScript>>,
}

#[derive(Debug, Default)]
struct SchedulerScript {
    submits: HashMap<TaskId, VecDeque<SchedulerResult<SubmitReceipt>>>,
    cancels: HashMap<TaskId, VecDeque<SchedulerResult<()>>>,
    delay: Option<Duration>,
    calls: Vec<SchedulerCall>,
}

impl InMemorySchedulerClient {
    /// Creates a client that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next submission of `task_id`.
    pub fn script_submit(&self, task_id: &TaskId, outcome: SchedulerResult<SubmitReceipt>) {
        self.with_script(|script| {
            script
                .submits
                .entry(task_id.clone())
                .or_default()
                .push_back(outcome);
        });
    }

    /// Queues the outcome of the next cancellation of `task_id`.
    pub fn script_cancel(&self, task_id: &TaskId, outcome: SchedulerResult<()>) {
        self.with_script(|script| {
            script
                .cancels
                .entry(task_id.clone())
                .or_default()
                .push_back(outcome);
        });
    }

    /// Delays every call by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.with_script(|script| script.delay = delay);
    }

    /// Returns the calls observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.state
            .lock()
            .map(|script| script.calls.clone())
            .unwrap_or_default()
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut SchedulerScript) -> T) -> Option<T> {
        self.state.lock().ok().map(|mut script| f(&mut script))
    }

    fn poisoned() -> SchedulerError {
        SchedulerError::Configuration("scheduler script lock poisoned".to_owned())
    }
}

#[async_trait]
impl SchedulerClient for InMemorySchedulerClient {
    async fn submit(&self, request: &SubmitRequest) -> SchedulerResult<SubmitReceipt> {
        let (outcome, delay) = self
            .with_script(|script| {
                script.calls.push(SchedulerCall::Submit(request.clone()));
                let next = script
                    .submits
                    .get_mut(&request.task_id)
                    .and_then(VecDeque::pop_front);
                (next, script.delay)
            })
            .ok_or_else(Self::poisoned)?;
        if let Some(pause) = delay {
            tokio::time::sleep(pause).await;
        }
        outcome.unwrap_or_else(|| Ok(SubmitReceipt::default()))
    }

    async fn cancel(&self, request: &CancelRequest) -> SchedulerResult<()> {
        let (outcome, delay) = self
            .with_script(|script| {
                script.calls.push(SchedulerCall::Cancel(request.clone()));
                let next = script
                    .cancels
                    .get_mut(&request.task_id)
                    .and_then(VecDeque::pop_front);
                (next, script.delay)
            })
            .ok_or_else(Self::poisoned)?;
        if let Some(pause) = delay {
            tokio::time::sleep(pause).await;
        }
        outcome.unwrap_or(Ok(()))
    }
}
