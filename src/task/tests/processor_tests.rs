//! Event processor tests: dispatch outcomes, cancellation, backpressure and
//! shutdown draining.

use crate::task::{
    adapters::{
        RepositorySettings,
        memory::{InMemorySchedulerClient, InMemoryTaskRepository, ManualClock, SchedulerCall},
    },
    domain::{JobId, ServiceName, TaskId, TaskRecord, TaskStatus, TaskTimezone, UserId},
    events::{
        CANCELLED_LOG, DISPATCHING_LOG, DispatchOrdering, EventProcessor, EventProcessorConfig,
        EventProcessorError,
    },
    ports::{
        DispatchEvent, EventPublisher, PublishError, SchedulerError, SubmitReceipt, SubmitRequest,
        TaskRepository,
    },
    services::{SubmitTaskRequest, TaskOutcome, TaskScope, TaskService, TaskServiceError},
};
use eyre::{bail, ensure};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

type TestRepository = InMemoryTaskRepository<ManualClock>;
type TestService = TaskService<TestRepository, EventProcessor, ManualClock>;

struct Pipeline {
    repository: Arc<TestRepository>,
    scheduler: InMemorySchedulerClient,
    processor: Arc<EventProcessor>,
    service: TestService,
}

fn pipeline(config: EventProcessorConfig) -> eyre::Result<Pipeline> {
    let clock = Arc::new(ManualClock::default());
    let repository = Arc::new(TestRepository::in_memory(
        Arc::clone(&clock),
        RepositorySettings::default(),
    ));
    let scheduler = InMemorySchedulerClient::new();
    let processor = Arc::new(EventProcessor::start(
        Arc::clone(&repository),
        Arc::new(scheduler.clone()),
        config,
    )?);
    let service = TaskService::new(
        Arc::clone(&repository),
        Arc::clone(&processor),
        clock,
        TaskTimezone::UTC,
    );
    Ok(Pipeline {
        repository,
        scheduler,
        processor,
        service,
    })
}

fn single_worker(capacity: usize) -> EventProcessorConfig {
    EventProcessorConfig {
        worker_count: 1,
        queue_capacity: capacity,
        ..EventProcessorConfig::default()
    }
}

async fn wait_for_status(
    repository: &TestRepository,
    task_id: &TaskId,
    expected: TaskStatus,
) -> eyre::Result<TaskRecord> {
    for _ in 0..300 {
        let record = repository.get(task_id).await?;
        if record.status() == expected {
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = repository.get(task_id).await?;
    bail!("task {task_id} stuck in {} waiting for {expected}", record.status())
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> eyre::Result<()> {
    for _ in 0..300 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not reached in time")
}

fn messages(record: &TaskRecord) -> Vec<&str> {
    record.logs().iter().map(|entry| entry.message()).collect()
}

fn user_scope() -> eyre::Result<TaskScope> {
    Ok(TaskScope::User {
        service: ServiceName::new("sync")?,
        user_id: UserId::new("alice")?,
    })
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn accepted_submission_runs_then_records_failure() -> eyre::Result<()> {
    let pipeline = pipeline(EventProcessorConfig::default())?;
    pipeline.scheduler.script_submit(
        &TaskId::from_sequence(1),
        Ok(SubmitReceipt::with_job(JobId::new("job-9")?)),
    );

    let submitted = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    ensure!(submitted.status() == TaskStatus::Pending);

    let running =
        wait_for_status(&pipeline.repository, submitted.task_id(), TaskStatus::Running).await?;
    ensure!(running.jobs().iter().map(JobId::as_str).eq(["job-9"]));
    ensure!(messages(&running) == vec![DISPATCHING_LOG, "Scheduler accepted job job-9"]);

    let failed = pipeline
        .service
        .record_outcome(
            submitted.task_id(),
            TaskOutcome::Failed {
                reason: "OOMKilled".to_owned(),
            },
        )
        .await?;
    ensure!(failed.status() == TaskStatus::Failed);
    ensure!(messages(&failed).last() == Some(&"OOMKilled"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rejected_submission_marks_task_failed() -> eyre::Result<()> {
    let pipeline = pipeline(EventProcessorConfig::default())?;
    pipeline.scheduler.script_submit(
        &TaskId::from_sequence(1),
        Err(SchedulerError::Rejected {
            url: "http://scheduler/task".to_owned(),
            status: 404,
            body: "no such service".to_owned(),
        }),
    );

    let submitted = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let failed =
        wait_for_status(&pipeline.repository, submitted.task_id(), TaskStatus::Failed).await?;

    let last = messages(&failed).last().copied().unwrap_or_default();
    ensure!(last.starts_with("Dispatch failed:"), "unexpected log {last}");
    ensure!(last.contains("404"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn slow_scheduler_times_out_into_failure() -> eyre::Result<()> {
    let pipeline = pipeline(EventProcessorConfig {
        request_timeout: Duration::from_millis(50),
        ..EventProcessorConfig::default()
    })?;
    pipeline.scheduler.set_delay(Some(Duration::from_millis(500)));

    let submitted = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let failed =
        wait_for_status(&pipeline.repository, submitted.task_id(), TaskStatus::Failed).await?;

    ensure!(messages(&failed).iter().any(|line| line.contains("timed out")));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelling_a_running_task_is_final() -> eyre::Result<()> {
    let pipeline = pipeline(EventProcessorConfig::default())?;
    let scope = user_scope()?;
    let submitted = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let task_id = submitted.task_id();
    wait_for_status(&pipeline.repository, task_id, TaskStatus::Running).await?;

    let returned = pipeline.service.cancel_task(&scope, task_id).await?;
    ensure!(returned.status() == TaskStatus::Running);

    let cancelled = wait_for_status(&pipeline.repository, task_id, TaskStatus::Cancelled).await?;
    ensure!(messages(&cancelled).last() == Some(&CANCELLED_LOG));

    match pipeline.service.cancel_task(&scope, task_id).await {
        Err(TaskServiceError::AlreadyTerminal { status, .. }) => {
            ensure!(status == TaskStatus::Cancelled);
        }
        other => bail!("expected already terminal, got {other:?}"),
    }
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_cancellation_keeps_status_and_logs() -> eyre::Result<()> {
    let pipeline = pipeline(single_worker(8))?;
    let submitted = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let task_id = submitted.task_id();
    wait_for_status(&pipeline.repository, task_id, TaskStatus::Running).await?;
    pipeline.scheduler.script_cancel(
        task_id,
        Err(SchedulerError::Unavailable {
            url: "http://scheduler/cancel".to_owned(),
            message: "connection refused".to_owned(),
        }),
    );

    pipeline.service.cancel_task(&user_scope()?, task_id).await?;
    let repository = Arc::clone(&pipeline.repository);
    let mut logged = false;
    for _ in 0..300 {
        let record = repository.get(task_id).await?;
        if messages(&record)
            .iter()
            .any(|line| line.starts_with("Cancellation failed:"))
        {
            ensure!(record.status() == TaskStatus::Running);
            logged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    ensure!(logged, "cancellation failure was never logged");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn full_queue_makes_publishers_wait() -> eyre::Result<()> {
    let pipeline = pipeline(single_worker(1))?;
    pipeline.scheduler.set_delay(Some(Duration::from_millis(300)));

    pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let processor = Arc::clone(&pipeline.processor);
    wait_until(|| processor.queued() == 0).await?;
    pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    ensure!(pipeline.processor.queued() == 1);

    let third = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "bob"));
    let blocked = tokio::time::timeout(Duration::from_millis(50), third).await;
    ensure!(blocked.is_err(), "publish should wait for free capacity");

    let pending = pipeline.repository.get(&TaskId::from_sequence(3)).await?;
    ensure!(pending.status() == TaskStatus::Pending);
    pipeline
        .processor
        .publish(DispatchEvent::Submit(SubmitRequest::from_record(&pending)))
        .await?;
    wait_for_status(&pipeline.repository, pending.task_id(), TaskStatus::Running).await?;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_queued_events() -> eyre::Result<()> {
    let pipeline = pipeline(single_worker(8))?;
    pipeline.scheduler.set_delay(Some(Duration::from_millis(20)));
    let mut submitted = Vec::new();
    for _ in 0..3 {
        submitted.push(
            pipeline
                .service
                .submit(SubmitTaskRequest::new("sync", "alice"))
                .await?,
        );
    }

    let report = pipeline.processor.shutdown(Duration::from_secs(5)).await;

    ensure!(report.is_complete());
    ensure!(!pipeline.processor.is_accepting());
    for record in &submitted {
        let stored = pipeline.repository.get(record.task_id()).await?;
        ensure!(stored.status() == TaskStatus::Running);
    }
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_reports_abandoned_events_after_grace() -> eyre::Result<()> {
    let pipeline = pipeline(single_worker(8))?;
    pipeline.scheduler.set_delay(Some(Duration::from_secs(2)));
    for _ in 0..3 {
        pipeline
            .service
            .submit(SubmitTaskRequest::new("sync", "alice"))
            .await?;
    }
    let processor = Arc::clone(&pipeline.processor);
    wait_until(|| processor.queued() == 2).await?;

    let report = pipeline.processor.shutdown(Duration::from_millis(50)).await;

    ensure!(!report.is_complete());
    ensure!(report.aborted_workers == 1);
    ensure!(report.drained == 0);
    let abandoned: Vec<&str> = report
        .abandoned
        .iter()
        .map(|event| event.task_id().as_str())
        .collect();
    ensure!(abandoned == vec!["2", "3"]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn drained_counts_events_finished_after_shutdown_began() -> eyre::Result<()> {
    let pipeline = pipeline(single_worker(8))?;
    pipeline.scheduler.set_delay(Some(Duration::from_millis(300)));
    for _ in 0..3 {
        pipeline
            .service
            .submit(SubmitTaskRequest::new("sync", "alice"))
            .await?;
    }
    let processor = Arc::clone(&pipeline.processor);
    wait_until(|| processor.queued() == 2).await?;

    let report = pipeline.processor.shutdown(Duration::from_secs(5)).await;

    ensure!(report.is_complete());
    ensure!(report.drained == 2, "drained {}", report.drained);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_releases_publishers_waiting_for_capacity() -> eyre::Result<()> {
    let pipeline = pipeline(single_worker(1))?;
    pipeline.scheduler.set_delay(Some(Duration::from_secs(2)));
    pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let processor = Arc::clone(&pipeline.processor);
    wait_until(|| processor.queued() == 0).await?;
    pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    ensure!(pipeline.processor.queued() == 1);

    let service = pipeline.service.clone();
    let waiting = tokio::spawn(async move {
        service
            .submit(SubmitTaskRequest::new("sync", "bob"))
            .await
    });
    let third = TaskId::from_sequence(3);
    for _ in 0..300 {
        if pipeline.repository.get(&third).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    ensure!(!waiting.is_finished(), "third submission should wait for capacity");

    let report = pipeline.processor.shutdown(Duration::from_millis(100)).await;

    let released = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .map_err(|_| eyre::eyre!("submission still waiting after shutdown"))???;
    ensure!(released.task_id() == &third);
    ensure!(released.status() == TaskStatus::Failed);
    ensure!(
        messages(&released)
            .iter()
            .any(|line| line.starts_with("Dispatch not queued:"))
    );
    ensure!(pipeline.repository.get(&third).await?.status() == TaskStatus::Failed);

    let abandoned: Vec<&str> = report
        .abandoned
        .iter()
        .map(|event| event.task_id().as_str())
        .collect();
    ensure!(abandoned == vec!["2"]);
    ensure!(report.aborted_workers == 1);
    ensure!(report.drained == 0);
    ensure!(pipeline.processor.queued() == 0);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn publishing_after_shutdown_is_rejected() -> eyre::Result<()> {
    let pipeline = pipeline(EventProcessorConfig::default())?;
    pipeline.processor.shutdown(Duration::from_secs(1)).await;

    let record = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    ensure!(record.status() == TaskStatus::Failed);
    ensure!(
        messages(&record)
            .iter()
            .any(|line| line.starts_with("Dispatch not queued:"))
    );

    let event = DispatchEvent::Submit(SubmitRequest::from_record(&record));
    match pipeline.processor.publish(event).await {
        Err(PublishError::ShuttingDown { task_id, .. }) => ensure!(&task_id == record.task_id()),
        other => bail!("expected shutting down, got {other:?}"),
    }
    ensure!(pipeline.scheduler.calls().is_empty());
    Ok(())
}

#[rstest]
#[case(DispatchOrdering::Shared)]
#[case(DispatchOrdering::PartitionedByTask)]
#[tokio::test(flavor = "multi_thread")]
async fn racing_submit_and_cancel_settle_consistently(
    #[case] ordering: DispatchOrdering,
) -> eyre::Result<()> {
    let pipeline = pipeline(EventProcessorConfig {
        ordering,
        ..EventProcessorConfig::default()
    })?;
    let submitted = pipeline
        .service
        .submit(SubmitTaskRequest::new("sync", "alice"))
        .await?;
    let task_id = submitted.task_id();
    pipeline
        .service
        .cancel_task(&TaskScope::Operator, task_id)
        .await?;

    let report = pipeline.processor.shutdown(Duration::from_secs(5)).await;
    ensure!(report.is_complete());

    let settled = pipeline.repository.get(task_id).await?;
    ensure!(
        matches!(settled.status(), TaskStatus::Running | TaskStatus::Cancelled),
        "unexpected status {}",
        settled.status()
    );
    if ordering == DispatchOrdering::PartitionedByTask {
        let calls = pipeline.scheduler.calls();
        ensure!(matches!(
            calls.as_slice(),
            [SchedulerCall::Submit(_), SchedulerCall::Cancel(_)]
        ));
        ensure!(settled.status() == TaskStatus::Cancelled);
    }
    Ok(())
}

#[rstest]
#[case(0, 8, EventProcessorError::NoWorkers)]
#[case(2, 0, EventProcessorError::ZeroCapacity)]
#[tokio::test(flavor = "multi_thread")]
async fn invalid_sizing_is_rejected(
    #[case] worker_count: usize,
    #[case] queue_capacity: usize,
    #[case] expected: EventProcessorError,
) -> eyre::Result<()> {
    let result = pipeline(EventProcessorConfig {
        worker_count,
        queue_capacity,
        ..EventProcessorConfig::default()
    });
    match result {
        Err(err) => ensure!(err.downcast_ref::<EventProcessorError>() == Some(&expected)),
        Ok(_) => bail!("expected {expected}"),
    }
    Ok(())
}
