//! Shared world state for task dispatch BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use taskrelay::task::{
    adapters::{
        RepositorySettings,
        memory::{InMemorySchedulerClient, InMemoryTaskRepository, ManualClock},
    },
    domain::{TaskRecord, TaskStatus, TaskTimezone},
    events::{EventProcessor, EventProcessorConfig, EventProcessorError},
    ports::TaskRepository,
    services::{TaskService, TaskServiceError},
};
use rstest::fixture;

/// Repository type used by the BDD world.
pub type TestRepository = InMemoryTaskRepository<ManualClock>;

/// Service type used by the BDD world.
pub type TestTaskService = TaskService<TestRepository, EventProcessor, ManualClock>;

/// Scenario world for dispatch behaviour tests.
pub struct DispatchWorld {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<TestRepository>,
    pub scheduler: InMemorySchedulerClient,
    pub service: Option<TestTaskService>,
    pub last_task: Option<TaskRecord>,
    pub last_error: Option<TaskServiceError>,
}

impl DispatchWorld {
    /// Creates a world with an empty store and an accepting scheduler.
    #[must_use]
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let repository = Arc::new(TestRepository::in_memory(
            Arc::clone(&clock),
            RepositorySettings::default(),
        ));
        Self {
            clock,
            repository,
            scheduler: InMemorySchedulerClient::new(),
            service: None,
            last_task: None,
            last_error: None,
        }
    }

    /// Starts the event processor on the current runtime.
    pub fn start(&mut self) -> Result<(), EventProcessorError> {
        let processor = EventProcessor::start(
            Arc::clone(&self.repository),
            Arc::new(self.scheduler.clone()),
            EventProcessorConfig::default(),
        )?;
        self.service = Some(TaskService::new(
            Arc::clone(&self.repository),
            Arc::new(processor),
            Arc::clone(&self.clock),
            TaskTimezone::UTC,
        ));
        Ok(())
    }

    /// Returns the running service.
    pub fn service(&self) -> Result<&TestTaskService, eyre::Report> {
        self.service
            .as_ref()
            .ok_or_else(|| eyre::eyre!("dispatch pipeline not started in scenario world"))
    }

    /// Returns the task the scenario is following.
    pub fn task(&self) -> Result<&TaskRecord, eyre::Report> {
        self.last_task
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing submitted task in scenario world"))
    }

    /// Polls the store until the followed task reaches `expected`.
    pub async fn wait_for(&self, expected: TaskStatus) -> Result<TaskRecord, eyre::Report> {
        let task_id = self.task()?.task_id().clone();
        for _ in 0..300 {
            let record = self.repository.get(&task_id).await?;
            if record.status() == expected {
                return Ok(record);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(eyre::eyre!("task {task_id} never became {expected}"))
    }
}

impl Default for DispatchWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> DispatchWorld {
    DispatchWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
