//! Runtime configuration, loaded from `TASKRELAY_*` environment variables.
//!
//! Every setting has a default except the database URL, which is required
//! unless the in-memory store is selected.

use crate::task::{
    adapters::{DEFAULT_TASK_TTL, RepositorySettings, http::HttpSchedulerConfig},
    domain::TaskTimezone,
    events::{DispatchOrdering, EventProcessorConfig},
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "TASKRELAY_";

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset.
    #[error("missing required setting {0}")]
    Missing(String),

    /// A variable holds a value that cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Full variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Runtime configuration for the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `PostgreSQL` URL of the shared store.
    pub database_url: Option<String>,
    /// Maximum pooled database connections (default: 8).
    pub database_pool_size: u32,
    /// Bound on each store round trip and on connection checkout
    /// (default: 5s).
    pub store_timeout: Duration,
    /// Use the process-local store instead of `PostgreSQL`.
    pub use_in_memory_store: bool,
    /// Sliding retention window (default: 90 days).
    pub task_ttl: Duration,
    /// Timezone for record timestamps and log prefixes (default: UTC).
    pub timezone: TaskTimezone,
    /// Scheduler endpoint settings.
    pub scheduler: HttpSchedulerConfig,
    /// Dispatch worker count (default: 4).
    pub event_worker_count: usize,
    /// Dispatch queue capacity (default: 256).
    pub event_queue_capacity: usize,
    /// Queue topology (default: shared).
    pub dispatch_ordering: DispatchOrdering,
    /// Grace period for draining the queue at shutdown (default: 30s).
    pub shutdown_grace: Duration,
    /// Interval between expired-row sweeps; `None` disables sweeping.
    pub store_sweep_interval: Option<Duration>,
    /// Shared secret expected on operator routes.
    pub operator_token: Option<String>,
    /// `tracing` filter string, e.g. `"info"` or `"taskrelay=debug"`.
    pub log_level: String,
    /// Emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl AppConfig {
    /// Builds configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is malformed or a required
    /// one is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is malformed or a required
    /// one is missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let use_in_memory_store = env.flag("USE_IN_MEMORY_STORE")?;
        let database_url = env.string("DATABASE_URL");
        if database_url.is_none() && !use_in_memory_store {
            return Err(ConfigError::Missing(format!("{ENV_PREFIX}DATABASE_URL")));
        }

        let mut scheduler = HttpSchedulerConfig::new(
            env.string("SCHEDULER_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:9000".to_owned()),
        );
        if let Some(endpoint) = env.string("SCHEDULER_TASK_ENDPOINT") {
            scheduler.task_endpoint = endpoint;
        }
        if let Some(endpoint) = env.string("SCHEDULER_CANCEL_ENDPOINT") {
            scheduler.cancel_endpoint = endpoint;
        }
        scheduler.request_timeout = env.seconds("REQUEST_TIMEOUT_SECONDS", 10)?;

        Ok(Self {
            database_url,
            database_pool_size: env.positive("DATABASE_POOL_SIZE", 8)?,
            store_timeout: env.seconds("STORE_TIMEOUT_SECONDS", 5)?,
            use_in_memory_store,
            task_ttl: env.seconds("TASK_TTL_SECONDS", DEFAULT_TASK_TTL.as_secs())?,
            timezone: env.timezone("TIMEZONE")?,
            scheduler,
            event_worker_count: env.positive("EVENT_WORKER_COUNT", 4)?,
            event_queue_capacity: env.positive("EVENT_QUEUE_CAPACITY", 256)?,
            dispatch_ordering: env.ordering("DISPATCH_ORDERING")?,
            shutdown_grace: env.seconds("SHUTDOWN_GRACE_SECONDS", 30)?,
            store_sweep_interval: env.optional_seconds("STORE_SWEEP_SECONDS")?,
            operator_token: env.string("OPERATOR_TOKEN"),
            log_level: env.string("LOG").unwrap_or_else(|| "info".to_owned()),
            log_json: env.flag("LOG_JSON")?,
        })
    }

    /// Repository settings derived from this configuration.
    #[must_use]
    pub const fn repository_settings(&self) -> RepositorySettings {
        RepositorySettings {
            ttl: self.task_ttl,
            timezone: self.timezone,
        }
    }

    /// Event processor settings derived from this configuration.
    #[must_use]
    pub const fn processor_config(&self) -> EventProcessorConfig {
        EventProcessorConfig {
            worker_count: self.event_worker_count,
            queue_capacity: self.event_queue_capacity,
            request_timeout: self.scheduler.request_timeout,
            ordering: self.dispatch_ordering,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}{name}")
    }

    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name))
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn invalid(name: &str, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            key: Self::key(name),
            value: value.to_owned(),
            reason: reason.into(),
        }
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|err| Self::invalid(name, &raw, err.to_string()))
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> Result<bool, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(false);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Self::invalid(name, &raw, "expected a boolean")),
        }
    }

    fn positive<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: std::fmt::Display,
    {
        match self.parse::<T>(name)? {
            None => Ok(default),
            Some(value) if value == T::default() => Err(Self::invalid(
                name,
                "0",
                "must be greater than zero",
            )),
            Some(value) => Ok(value),
        }
    }

    fn seconds(&self, name: &str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(name, default).map(Duration::from_secs)
    }

    fn optional_seconds(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self
            .parse::<u64>(name)?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs))
    }

    fn timezone(&self, name: &str) -> Result<TaskTimezone, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(TaskTimezone::UTC);
        };
        TaskTimezone::parse(&raw)
            .ok_or_else(|| Self::invalid(name, &raw, "unknown IANA timezone"))
    }

    fn ordering(&self, name: &str) -> Result<DispatchOrdering, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(DispatchOrdering::default());
        };
        match raw.to_ascii_lowercase().as_str() {
            "shared" => Ok(DispatchOrdering::Shared),
            "partitioned" | "partitioned_by_task" => Ok(DispatchOrdering::PartitionedByTask),
            _ => Err(Self::invalid(
                name,
                &raw,
                "expected `shared` or `partitioned`",
            )),
        }
    }
}
