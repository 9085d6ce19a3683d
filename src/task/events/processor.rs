//! Bounded worker pool draining dispatch events.
//!
//! Events travel over bounded `flume` channels. Publishing waits for free
//! capacity instead of dropping work, until shutdown begins. Shutdown closes
//! the queues, releases waiting publishers, lets the workers drain the queues
//! for a grace period and reports anything left behind.

use super::worker::DispatchWorker;
use crate::task::ports::{
    DispatchEvent, EventPublisher, PublishError, SchedulerClient, TaskRepository,
};
use async_trait::async_trait;
use flume::{Receiver, Sender};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How events are spread over workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchOrdering {
    /// One queue shared by every worker. Events for the same task may be
    /// handled concurrently.
    #[default]
    Shared,
    /// One queue per worker, chosen by hashing the task id. Events for the
    /// same task are handled in publish order.
    PartitionedByTask,
}

/// Sizing and timing of an [`EventProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventProcessorConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Capacity of each queue.
    pub queue_capacity: usize,
    /// Upper bound on each scheduler call.
    pub request_timeout: Duration,
    /// Queue topology.
    pub ordering: DispatchOrdering,
}

impl Default for EventProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            request_timeout: Duration::from_secs(10),
            ordering: DispatchOrdering::Shared,
        }
    }
}

/// Errors raised when starting an [`EventProcessor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventProcessorError {
    /// The pool needs at least one worker.
    #[error("event processor needs at least one worker")]
    NoWorkers,
    /// Queues need room for at least one event.
    #[error("event queue capacity must be at least one")]
    ZeroCapacity,
}

/// Result of [`EventProcessor::shutdown`].
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Events workers picked up and finished after shutdown began.
    pub drained: usize,
    /// Events left in the queues when the grace period ran out.
    pub abandoned: Vec<DispatchEvent>,
    /// Workers stopped mid-flight when the grace period ran out.
    pub aborted_workers: usize,
}

impl DrainReport {
    /// Returns `true` when every queued event was handled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.abandoned.is_empty() && self.aborted_workers == 0
    }
}

/// Process-local dispatch queue with a fixed worker pool.
pub struct EventProcessor {
    senders: Mutex<Option<Vec<Sender<DispatchEvent>>>>,
    queues: Vec<Receiver<DispatchEvent>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ordering: DispatchOrdering,
    closed: watch::Sender<bool>,
    drained: Arc<AtomicUsize>,
}

impl EventProcessor {
    /// Spawns the worker pool on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EventProcessorError`] when the configuration leaves no
    /// worker or no queue capacity.
    pub fn start<R, S>(
        repository: Arc<R>,
        scheduler: Arc<S>,
        config: EventProcessorConfig,
    ) -> Result<Self, EventProcessorError>
    where
        R: TaskRepository + 'static,
        S: SchedulerClient + ?Sized + 'static,
    {
        if config.worker_count == 0 {
            return Err(EventProcessorError::NoWorkers);
        }
        if config.queue_capacity == 0 {
            return Err(EventProcessorError::ZeroCapacity);
        }

        let queue_count = match config.ordering {
            DispatchOrdering::Shared => 1,
            DispatchOrdering::PartitionedByTask => config.worker_count,
        };
        let (senders, queues): (Vec<_>, Vec<_>) = (0..queue_count)
            .map(|_| flume::bounded(config.queue_capacity))
            .unzip();

        let (closed, closed_signal) = watch::channel(false);
        let drained = Arc::new(AtomicUsize::new(0));
        let template = DispatchWorker::new(repository, scheduler, config.request_timeout);
        let workers = (0..config.worker_count)
            .zip(queues.iter().cycle())
            .map(|(id, queue)| {
                let worker = template.with_id(id);
                let receiver = queue.clone();
                let closed_signal = closed_signal.clone();
                let drained = Arc::clone(&drained);
                tokio::spawn(async move {
                    while let Ok(event) = receiver.recv_async().await {
                        let after_close = *closed_signal.borrow();
                        worker.handle(event).await;
                        if after_close {
                            drained.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        info!(
            workers = config.worker_count,
            capacity = config.queue_capacity,
            ordering = ?config.ordering,
            "event processor started"
        );
        Ok(Self {
            senders: Mutex::new(Some(senders)),
            queues,
            workers: Mutex::new(workers),
            ordering: config.ordering,
            closed,
            drained,
        })
    }

    /// Returns the queue topology.
    #[must_use]
    pub const fn ordering(&self) -> DispatchOrdering {
        self.ordering
    }

    /// Returns the number of events waiting in the queues.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queues.iter().map(Receiver::len).sum()
    }

    /// Returns `false` once shutdown has begun.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.senders
            .lock()
            .is_ok_and(|senders| senders.is_some())
    }

    /// Stops accepting events and waits up to `grace` for the queues to
    /// drain.
    ///
    /// Publishers still waiting for capacity are released with
    /// [`PublishError::ShuttingDown`]. Workers still busy when the grace
    /// period ends are aborted and leftover events are returned in the
    /// report.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        let closed = self.senders.lock().ok().and_then(|mut senders| senders.take());
        if closed.is_none() {
            return DrainReport::default();
        }
        drop(closed);
        self.closed.send_replace(true);

        let deadline = tokio::time::Instant::now() + grace;
        if tokio::time::timeout_at(deadline, self.publishers_released())
            .await
            .is_err()
        {
            warn!("publishers still holding the queue when the grace period ended");
        }
        info!(queued = self.queued(), ?grace, "event processor shutting down");

        let mut handles = self
            .workers
            .lock()
            .map(|mut workers| std::mem::take(&mut *workers))
            .unwrap_or_default();
        for handle in &mut handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                break;
            }
        }

        let mut aborted_workers = 0;
        for handle in &handles {
            if !handle.is_finished() {
                handle.abort();
                aborted_workers += 1;
            }
        }

        let abandoned: Vec<DispatchEvent> =
            self.queues.iter().flat_map(|queue| queue.drain()).collect();
        for event in &abandoned {
            error!(
                task_id = %event.task_id(),
                event_kind = %event.kind(),
                "dispatch event abandoned at shutdown"
            );
        }
        if aborted_workers > 0 {
            warn!(aborted_workers, "workers aborted before finishing their event");
        }

        let report = DrainReport {
            drained: self.drained.load(Ordering::Relaxed),
            abandoned,
            aborted_workers,
        };
        info!(
            drained = report.drained,
            abandoned = report.abandoned.len(),
            complete = report.is_complete(),
            "event processor stopped"
        );
        report
    }

    /// Resolves once no publisher holds a queue sender.
    async fn publishers_released(&self) {
        while self.queues.iter().any(|queue| queue.sender_count() > 0) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn sender_for(&self, event: &DispatchEvent) -> Option<Sender<DispatchEvent>> {
        let guard = self.senders.lock().ok()?;
        let senders = guard.as_ref()?;
        let slot = match self.ordering {
            DispatchOrdering::Shared => 0,
            DispatchOrdering::PartitionedByTask => partition(event, senders.len()),
        };
        senders.get(slot).cloned()
    }
}

#[async_trait]
impl EventPublisher for EventProcessor {
    async fn publish(&self, event: DispatchEvent) -> Result<(), PublishError> {
        let task_id = event.task_id().clone();
        let kind = event.kind();
        let rejected = || PublishError::ShuttingDown {
            task_id: task_id.clone(),
            kind,
        };
        let Some(sender) = self.sender_for(&event) else {
            return Err(rejected());
        };
        let closed_signal = self.closed.subscribe();
        tokio::select! {
            biased;
            sent = sender.send_async(event) => sent.map_err(|_| rejected()),
            () = shutdown_begun(closed_signal) => {
                warn!(%task_id, event_kind = %kind, "publisher released by shutdown");
                Err(rejected())
            }
        }
    }
}

/// Resolves when shutdown begins or the processor is gone.
async fn shutdown_begun(mut closed_signal: watch::Receiver<bool>) {
    while !*closed_signal.borrow_and_update() {
        if closed_signal.changed().await.is_err() {
            return;
        }
    }
}

fn partition(event: &DispatchEvent, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    event.task_id().hash(&mut hasher);
    let width = u64::try_from(partitions).unwrap_or(u64::MAX);
    hasher
        .finish()
        .checked_rem(width)
        .and_then(|slot| usize::try_from(slot).ok())
        .unwrap_or(0)
}
