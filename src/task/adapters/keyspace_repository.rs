//! Task repository implemented once over any [`Keyspace`].
//!
//! Both the durable store and the process-local mirror run the exact same
//! repository logic; they differ only in the keyspace underneath. Index
//! membership of a record whose primary key expired is left in place until a
//! read path notices the missing record and prunes it.

use super::keys::{
    ALL_TASKS_INDEX, TASK_SEQUENCE, service_index, service_user_index, service_users_index,
    task_key,
};
use crate::task::{
    domain::{
        JobId, ResultUpdate, ServiceName, TaskDomainError, TaskId, TaskRecord, TaskStatus,
        TaskTimezone, UserId,
    },
    ports::{Keyspace, TaskRepository, TaskRepositoryError, TaskRepositoryResult},
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default retention window for task keys: 90 days.
pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Retention and rendering settings for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositorySettings {
    /// Sliding time-to-live refreshed on every key a write touches.
    pub ttl: Duration,
    /// Timezone used for record timestamps and log prefixes.
    pub timezone: TaskTimezone,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TASK_TTL,
            timezone: TaskTimezone::UTC,
        }
    }
}

/// Task repository layered over a [`Keyspace`].
pub struct KeyspaceTaskRepository<K, C = DefaultClock> {
    keyspace: K,
    clock: Arc<C>,
    settings: RepositorySettings,
}

impl<K, C> Clone for KeyspaceTaskRepository<K, C>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            keyspace: self.keyspace.clone(),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
        }
    }
}

impl<K, C> KeyspaceTaskRepository<K, C>
where
    K: Keyspace,
    C: Clock + Send + Sync,
{
    /// Creates a repository over `keyspace`.
    #[must_use]
    pub const fn new(keyspace: K, clock: Arc<C>, settings: RepositorySettings) -> Self {
        Self {
            keyspace,
            clock,
            settings,
        }
    }

    /// Returns the underlying keyspace.
    #[must_use]
    pub const fn keyspace(&self) -> &K {
        &self.keyspace
    }

    /// Returns the retention and rendering settings.
    #[must_use]
    pub const fn settings(&self) -> RepositorySettings {
        self.settings
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.settings.timezone.now(&*self.clock)
    }

    /// Loads, mutates and saves one record.
    async fn modify<F>(&self, task_id: &TaskId, mutate: F) -> TaskRepositoryResult<TaskRecord>
    where
        F: FnOnce(&mut TaskRecord, DateTime<FixedOffset>) -> Result<(), TaskDomainError> + Send,
    {
        let mut record = self.get(task_id).await?;
        mutate(&mut record, self.now())?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Loads live records and reports the ids that had none.
    async fn load_many(
        &self,
        ids: &[TaskId],
    ) -> TaskRepositoryResult<(Vec<TaskRecord>, Vec<String>)> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let keys: Vec<String> = ids.iter().map(task_key).collect();
        let values = self.keyspace.get_many(&keys).await?;

        let mut records = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (task_id, value) in ids.iter().zip(values) {
            match value {
                Some(raw) => records.push(decode(&raw)?),
                None => missing.push(task_id.as_str().to_owned()),
            }
        }
        records.sort_by(|left, right| {
            left.created_at()
                .cmp(&right.created_at())
                .then_with(|| left.task_id().cmp(right.task_id()))
        });
        Ok((records, missing))
    }

    /// Resolves an index to live records, pruning members whose primary
    /// record no longer exists.
    async fn list_index(&self, index_key: &str) -> TaskRepositoryResult<Vec<TaskRecord>> {
        let members = self.keyspace.set_members(index_key).await?;
        let ids: Vec<TaskId> = members
            .into_iter()
            .filter_map(|member| TaskId::new(member).ok())
            .collect();
        let (records, stale) = self.load_many(&ids).await?;
        if !stale.is_empty() {
            debug!(
                index = index_key,
                pruned = stale.len(),
                "pruning index members without a live record"
            );
            self.keyspace.set_remove(index_key, &stale).await?;
        }
        Ok(records)
    }
}

#[async_trait]
impl<K, C> TaskRepository for KeyspaceTaskRepository<K, C>
where
    K: Keyspace,
    C: Clock + Send + Sync,
{
    async fn next_task_id(&self) -> TaskRepositoryResult<TaskId> {
        let value = self.keyspace.increment(TASK_SEQUENCE).await?;
        Ok(TaskId::from_sequence(value))
    }

    async fn save(&self, record: &TaskRecord) -> TaskRepositoryResult<()> {
        let payload = serde_json::to_string(record).map_err(TaskRepositoryError::persistence)?;
        let ttl = self.settings.ttl;
        let task_id = record.task_id().as_str();

        self.keyspace
            .put(&task_key(record.task_id()), &payload, ttl)
            .await?;
        self.keyspace.set_add(ALL_TASKS_INDEX, task_id, ttl).await?;
        self.keyspace
            .set_add(&service_index(record.service()), task_id, ttl)
            .await?;
        self.keyspace
            .set_add(
                &service_users_index(record.service()),
                record.user_id().as_str(),
                ttl,
            )
            .await?;
        self.keyspace
            .set_add(
                &service_user_index(record.service(), record.user_id()),
                task_id,
                ttl,
            )
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> TaskRepositoryResult<TaskRecord> {
        let raw = self
            .keyspace
            .get(&task_key(task_id))
            .await?
            .ok_or_else(|| TaskRepositoryError::NotFound(task_id.clone()))?;
        decode(&raw)
    }

    async fn delete(&self, task_id: &TaskId) -> TaskRepositoryResult<()> {
        let record = self.get(task_id).await?;
        let member = [task_id.as_str().to_owned()];
        let user_index = service_user_index(record.service(), record.user_id());

        self.keyspace.remove(&task_key(task_id)).await?;
        self.keyspace.set_remove(ALL_TASKS_INDEX, &member).await?;
        self.keyspace
            .set_remove(&service_index(record.service()), &member)
            .await?;
        self.keyspace.set_remove(&user_index, &member).await?;

        if self.keyspace.set_len(&user_index).await? == 0 {
            self.keyspace
                .set_remove(
                    &service_users_index(record.service()),
                    &[record.user_id().as_str().to_owned()],
                )
                .await?;
        }
        info!(%task_id, service = %record.service(), "task deleted");
        Ok(())
    }

    async fn list_by_ids(&self, ids: &[TaskId]) -> TaskRepositoryResult<Vec<TaskRecord>> {
        let (records, _) = self.load_many(ids).await?;
        Ok(records)
    }

    async fn list_all(&self) -> TaskRepositoryResult<Vec<TaskRecord>> {
        self.list_index(ALL_TASKS_INDEX).await
    }

    async fn list_by_service(
        &self,
        service: &ServiceName,
    ) -> TaskRepositoryResult<Vec<TaskRecord>> {
        self.list_index(&service_index(service)).await
    }

    async fn list_by_service_and_user(
        &self,
        service: &ServiceName,
        user_id: &UserId,
    ) -> TaskRepositoryResult<Vec<TaskRecord>> {
        self.list_index(&service_user_index(service, user_id)).await
    }

    async fn list_users_by_service(
        &self,
        service: &ServiceName,
    ) -> TaskRepositoryResult<Vec<UserId>> {
        let users_index = service_users_index(service);
        let members = self.keyspace.set_members(&users_index).await?;

        let mut users = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        for member in members {
            let Ok(user_id) = UserId::new(member.clone()) else {
                stale.push(member);
                continue;
            };
            if self
                .keyspace
                .set_len(&service_user_index(service, &user_id))
                .await?
                == 0
            {
                stale.push(member);
            } else {
                users.push(user_id);
            }
        }
        if !stale.is_empty() {
            debug!(index = %users_index, pruned = stale.len(), "pruning users without tasks");
            self.keyspace.set_remove(&users_index, &stale).await?;
        }
        users.sort();
        Ok(users)
    }

    async fn set_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        log_entry: Option<&str>,
    ) -> TaskRepositoryResult<TaskRecord> {
        let result = self
            .modify(task_id, |record, at| {
                record.transition_to(status, at)?;
                if let Some(message) = log_entry {
                    record.log(message, at);
                }
                Ok(())
            })
            .await;
        if let Err(TaskRepositoryError::InvalidTransition { from, to, .. }) = &result {
            warn!(%task_id, %from, %to, "status transition rejected");
        }
        result
    }

    async fn append_log(
        &self,
        task_id: &TaskId,
        message: &str,
    ) -> TaskRepositoryResult<TaskRecord> {
        self.modify(task_id, |record, at| {
            record.log(message, at);
            Ok(())
        })
        .await
    }

    async fn append_job(
        &self,
        task_id: &TaskId,
        job_id: JobId,
    ) -> TaskRepositoryResult<TaskRecord> {
        self.modify(task_id, |record, at| {
            record.push_job(job_id, at);
            Ok(())
        })
        .await
    }

    async fn update_result(
        &self,
        task_id: &TaskId,
        update: ResultUpdate,
    ) -> TaskRepositoryResult<TaskRecord> {
        self.modify(task_id, |record, at| {
            record.merge_result(update, at);
            Ok(())
        })
        .await
    }

    async fn health_check(&self) -> TaskRepositoryResult<()> {
        self.keyspace.ping().await?;
        Ok(())
    }
}

fn decode(raw: &str) -> TaskRepositoryResult<TaskRecord> {
    serde_json::from_str(raw).map_err(TaskRepositoryError::persistence)
}
