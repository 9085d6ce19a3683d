//! Explicit wiring of the dispatch pipeline.
//!
//! [`TaskPipeline`] is built once at process start and owns every long-lived
//! component: the repository, the event processor, the task service and the
//! optional expired-row sweeper.

use crate::config::AppConfig;
use crate::task::{
    adapters::{
        KeyspaceTaskRepository,
        http::HttpSchedulerClient,
        memory::InMemoryKeyspace,
        postgres::{PostgresKeyspace, connect_pool},
    },
    events::{DrainReport, EventProcessor, EventProcessorError},
    ports::{
        Keyspace, KeyspaceError, SchedulerClient, SchedulerError, TaskRepository,
        TaskRepositoryError,
    },
    services::TaskService,
};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Repository type used by the pipeline, independent of the backing store.
pub type PipelineRepository<C = DefaultClock> = KeyspaceTaskRepository<Arc<dyn Keyspace>, C>;

/// Task service type exposed by the pipeline.
pub type PipelineService<C = DefaultClock> = TaskService<PipelineRepository<C>, EventProcessor, C>;

/// Errors raised while assembling the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is incomplete.
    #[error("pipeline configuration error: {0}")]
    Configuration(String),

    /// The backing store could not be reached.
    #[error(transparent)]
    Store(#[from] TaskRepositoryError),

    /// The scheduler client could not be built.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The event processor rejected its settings.
    #[error(transparent)]
    Processor(#[from] EventProcessorError),
}

impl From<KeyspaceError> for PipelineError {
    fn from(err: KeyspaceError) -> Self {
        Self::Store(err.into())
    }
}

/// Running dispatch pipeline.
pub struct TaskPipeline<C = DefaultClock> {
    repository: Arc<PipelineRepository<C>>,
    processor: Arc<EventProcessor>,
    service: PipelineService<C>,
    sweeper: Option<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl TaskPipeline<DefaultClock> {
    /// Builds the store and HTTP scheduler named by `config` and starts the
    /// pipeline on them.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the store is unreachable, the
    /// scheduler client cannot be built or the processor settings are
    /// invalid.
    pub async fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let clock = Arc::new(DefaultClock);
        let keyspace: Arc<dyn Keyspace> = if config.use_in_memory_store {
            info!("using in-memory task store");
            Arc::new(InMemoryKeyspace::new(Arc::clone(&clock)))
        } else {
            let url = config.database_url.clone().ok_or_else(|| {
                PipelineError::Configuration("database url is required".to_owned())
            })?;
            let pool_size = config.database_pool_size;
            let store_timeout = config.store_timeout;
            let pool =
                tokio::task::spawn_blocking(move || connect_pool(&url, pool_size, store_timeout))
                    .await
                    .map_err(KeyspaceError::backend)??;
            Arc::new(PostgresKeyspace::new(pool, Arc::clone(&clock)).with_timeout(store_timeout))
        };
        let scheduler = Arc::new(HttpSchedulerClient::new(config.scheduler.clone())?);
        Self::start(keyspace, scheduler, clock, config).await
    }
}

impl<C> TaskPipeline<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Checks store connectivity, then starts the processor and sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] when the store fails its health
    /// check and [`PipelineError::Processor`] for invalid processor settings.
    pub async fn start(
        keyspace: Arc<dyn Keyspace>,
        scheduler: Arc<dyn SchedulerClient>,
        clock: Arc<C>,
        config: &AppConfig,
    ) -> Result<Self, PipelineError> {
        let repository = Arc::new(KeyspaceTaskRepository::new(
            Arc::clone(&keyspace),
            Arc::clone(&clock),
            config.repository_settings(),
        ));
        repository.health_check().await?;

        let processor = Arc::new(EventProcessor::start(
            Arc::clone(&repository),
            scheduler,
            config.processor_config(),
        )?);
        let service = TaskService::new(
            Arc::clone(&repository),
            Arc::clone(&processor),
            clock,
            config.timezone,
        );
        let sweeper = config
            .store_sweep_interval
            .map(|interval| spawn_sweeper(keyspace, interval));

        info!(
            ttl_secs = config.task_ttl.as_secs(),
            timezone = %config.timezone,
            "task pipeline started"
        );
        Ok(Self {
            repository,
            processor,
            service,
            sweeper,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Returns the task service.
    #[must_use]
    pub const fn service(&self) -> &PipelineService<C> {
        &self.service
    }

    /// Returns the shared repository.
    #[must_use]
    pub const fn repository(&self) -> &Arc<PipelineRepository<C>> {
        &self.repository
    }

    /// Returns the event processor.
    #[must_use]
    pub fn processor(&self) -> &EventProcessor {
        &self.processor
    }

    /// Stops the sweeper and drains the dispatch queue within the configured
    /// grace period.
    pub async fn shutdown(self) -> DrainReport {
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        let report = self.processor.shutdown(self.shutdown_grace).await;
        if !report.is_complete() {
            warn!(
                abandoned = report.abandoned.len(),
                aborted_workers = report.aborted_workers,
                "dispatch queue not fully drained"
            );
        }
        report
    }
}

fn spawn_sweeper(keyspace: Arc<dyn Keyspace>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match keyspace.purge_expired().await {
                Ok(purged) => debug!(purged, "expired store entries purged"),
                Err(err) => warn!(error = %err, "store sweep failed"),
            }
        }
    })
}
