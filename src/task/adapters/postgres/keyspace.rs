//! `PostgreSQL` keyspace implementation.
//!
//! Values and counters live in their own tables. Sets are split into a row
//! per set, which carries the set's expiry, and a row per member. Every read
//! filters on expiry, so an expired row is invisible even before
//! [`Keyspace::purge_expired`] removes it.

use super::{
    models::{SetMemberRow, SetRow, ValueRow},
    schema::{task_store_counters, task_store_set_members, task_store_sets, task_store_values},
};
use crate::task::ports::{Keyspace, KeyspaceError, KeyspaceResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::upsert::excluded;
use mockable::{Clock, DefaultClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// `PostgreSQL` connection pool type used by task adapters.
pub type TaskPgPool = Pool<ConnectionManager<PgConnection>>;

/// Default bound on one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds a connection pool for `database_url`.
///
/// `store_timeout` bounds connection checkout and is installed as the
/// session `statement_timeout` of every pooled connection.
///
/// # Errors
///
/// Returns [`KeyspaceError::Unavailable`] when the pool cannot open its
/// initial connections.
pub fn connect_pool(
    database_url: &str,
    max_size: u32,
    store_timeout: Duration,
) -> KeyspaceResult<TaskPgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .connection_timeout(store_timeout)
        .connection_customizer(Box::new(StatementTimeout(store_timeout)))
        .build(manager)
        .map_err(KeyspaceError::unavailable)
}

/// Sets `statement_timeout` on each new connection.
#[derive(Debug, Clone, Copy)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, connection: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        let millis = self.0.as_millis();
        diesel::sql_query(format!("SET statement_timeout = {millis}"))
            .execute(connection)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// A store call outlived its time bound.
#[derive(Debug, Error)]
#[error("store call timed out after {after:?}")]
struct StoreTimeout {
    after: Duration,
}

/// `PostgreSQL`-backed keyspace.
pub struct PostgresKeyspace<C = DefaultClock> {
    pool: TaskPgPool,
    clock: Arc<C>,
    timeout: Duration,
}

impl<C> Clone for PostgresKeyspace<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            clock: Arc::clone(&self.clock),
            timeout: self.timeout,
        }
    }
}

impl<C: Clock + Send + Sync> PostgresKeyspace<C> {
    /// Creates a keyspace from a `PostgreSQL` connection pool, bounding each
    /// call by [`DEFAULT_STORE_TIMEOUT`].
    #[must_use]
    pub const fn new(pool: TaskPgPool, clock: Arc<C>) -> Self {
        Self {
            pool,
            clock,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Replaces the bound on each store call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `f` on a pooled connection off the async runtime.
    ///
    /// Calls that outlive the configured timeout fail with
    /// [`KeyspaceError::Unavailable`]; the server-side `statement_timeout`
    /// ends the abandoned query.
    async fn run_blocking<F, T>(&self, f: F) -> KeyspaceResult<T>
    where
        F: FnOnce(&mut PgConnection, DateTime<Utc>) -> KeyspaceResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let now = self.clock.utc();
        let call = tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(KeyspaceError::unavailable)?;
            f(&mut connection, now)
        });
        match tokio::time::timeout(self.timeout, call).await {
            Ok(joined) => joined.map_err(KeyspaceError::backend)?,
            Err(_) => Err(KeyspaceError::unavailable(StoreTimeout {
                after: self.timeout,
            })),
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> Keyspace for PostgresKeyspace<C> {
    async fn get(&self, key: &str) -> KeyspaceResult<Option<String>> {
        let lookup = key.to_owned();
        self.run_blocking(move |connection, now| {
            task_store_values::table
                .filter(task_store_values::key.eq(&lookup))
                .filter(task_store_values::expires_at.gt(now))
                .select(task_store_values::payload)
                .first::<String>(connection)
                .optional()
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn get_many(&self, keys: &[String]) -> KeyspaceResult<Vec<Option<String>>> {
        let lookup = keys.to_vec();
        self.run_blocking(move |connection, now| {
            let rows: Vec<(String, String)> = task_store_values::table
                .filter(task_store_values::key.eq_any(&lookup))
                .filter(task_store_values::expires_at.gt(now))
                .select((task_store_values::key, task_store_values::payload))
                .load(connection)
                .map_err(map_diesel_error)?;
            let found: HashMap<String, String> = rows.into_iter().collect();
            Ok(lookup.iter().map(|key| found.get(key).cloned()).collect())
        })
        .await
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> KeyspaceResult<()> {
        let owned_key = key.to_owned();
        let payload = value.to_owned();
        self.run_blocking(move |connection, now| {
            let row = ValueRow {
                key: &owned_key,
                payload: &payload,
                expires_at: expiry(now, ttl)?,
            };
            diesel::insert_into(task_store_values::table)
                .values(&row)
                .on_conflict(task_store_values::key)
                .do_update()
                .set((
                    task_store_values::payload.eq(excluded(task_store_values::payload)),
                    task_store_values::expires_at.eq(excluded(task_store_values::expires_at)),
                ))
                .execute(connection)
                .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> KeyspaceResult<bool> {
        let owned_key = key.to_owned();
        self.run_blocking(move |connection, now| {
            let removed: Vec<DateTime<Utc>> = diesel::delete(
                task_store_values::table.filter(task_store_values::key.eq(&owned_key)),
            )
            .returning(task_store_values::expires_at)
            .get_results(connection)
            .map_err(map_diesel_error)?;
            Ok(removed.iter().any(|expires_at| *expires_at > now))
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> KeyspaceResult<()> {
        let set_key = key.to_owned();
        let owned_member = member.to_owned();
        self.run_blocking(move |connection, now| {
            let expires_at = expiry(now, ttl)?;
            connection
                .transaction::<_, DieselError, _>(|tx| {
                    let expired = task_store_sets::table
                        .filter(task_store_sets::set_key.eq(&set_key))
                        .filter(task_store_sets::expires_at.le(now))
                        .select(task_store_sets::set_key)
                        .for_update()
                        .load::<String>(tx)?;
                    if !expired.is_empty() {
                        diesel::delete(
                            task_store_set_members::table
                                .filter(task_store_set_members::set_key.eq(&set_key)),
                        )
                        .execute(tx)?;
                    }
                    diesel::insert_into(task_store_sets::table)
                        .values(&SetRow {
                            set_key: &set_key,
                            expires_at,
                        })
                        .on_conflict(task_store_sets::set_key)
                        .do_update()
                        .set(task_store_sets::expires_at.eq(excluded(task_store_sets::expires_at)))
                        .execute(tx)?;
                    diesel::insert_into(task_store_set_members::table)
                        .values(&SetMemberRow {
                            set_key: &set_key,
                            member: &owned_member,
                        })
                        .on_conflict_do_nothing()
                        .execute(tx)?;
                    Ok(())
                })
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> KeyspaceResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let set_key = key.to_owned();
        let doomed = members.to_vec();
        self.run_blocking(move |connection, _| {
            diesel::delete(
                task_store_set_members::table
                    .filter(task_store_set_members::set_key.eq(&set_key))
                    .filter(task_store_set_members::member.eq_any(&doomed)),
            )
            .execute(connection)
            .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
    }

    async fn set_members(&self, key: &str) -> KeyspaceResult<Vec<String>> {
        let set_key = key.to_owned();
        self.run_blocking(move |connection, now| {
            if !set_is_live(connection, &set_key, now)? {
                return Ok(Vec::new());
            }
            task_store_set_members::table
                .filter(task_store_set_members::set_key.eq(&set_key))
                .select(task_store_set_members::member)
                .order(task_store_set_members::member.asc())
                .load(connection)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn set_len(&self, key: &str) -> KeyspaceResult<usize> {
        let set_key = key.to_owned();
        self.run_blocking(move |connection, now| {
            if !set_is_live(connection, &set_key, now)? {
                return Ok(0);
            }
            let count: i64 = task_store_set_members::table
                .filter(task_store_set_members::set_key.eq(&set_key))
                .count()
                .get_result(connection)
                .map_err(map_diesel_error)?;
            usize::try_from(count).map_err(KeyspaceError::backend)
        })
        .await
    }

    async fn increment(&self, key: &str) -> KeyspaceResult<u64> {
        let counter_key = key.to_owned();
        self.run_blocking(move |connection, _| {
            let value: i64 = diesel::insert_into(task_store_counters::table)
                .values((
                    task_store_counters::key.eq(&counter_key),
                    task_store_counters::value.eq(1_i64),
                ))
                .on_conflict(task_store_counters::key)
                .do_update()
                .set(task_store_counters::value.eq(task_store_counters::value + 1_i64))
                .returning(task_store_counters::value)
                .get_result(connection)
                .map_err(map_diesel_error)?;
            u64::try_from(value).map_err(KeyspaceError::backend)
        })
        .await
    }

    async fn purge_expired(&self) -> KeyspaceResult<u64> {
        self.run_blocking(move |connection, now| {
            connection
                .transaction::<_, DieselError, _>(|tx| {
                    let values = diesel::delete(
                        task_store_values::table.filter(task_store_values::expires_at.le(now)),
                    )
                    .execute(tx)?;
                    let expired_sets: Vec<String> = task_store_sets::table
                        .filter(task_store_sets::expires_at.le(now))
                        .select(task_store_sets::set_key)
                        .for_update()
                        .load(tx)?;
                    let members = diesel::delete(
                        task_store_set_members::table
                            .filter(task_store_set_members::set_key.eq_any(&expired_sets)),
                    )
                    .execute(tx)?;
                    diesel::delete(
                        task_store_sets::table
                            .filter(task_store_sets::set_key.eq_any(&expired_sets)),
                    )
                    .execute(tx)?;
                    Ok(values + members)
                })
                .map_err(map_diesel_error)
                .and_then(|purged| u64::try_from(purged).map_err(KeyspaceError::backend))
        })
        .await
    }

    async fn ping(&self) -> KeyspaceResult<()> {
        self.run_blocking(move |connection, _| {
            diesel::sql_query("SELECT 1")
                .execute(connection)
                .map_err(map_diesel_error)?;
            Ok(())
        })
        .await
    }
}

fn set_is_live(
    connection: &mut PgConnection,
    set_key: &str,
    now: DateTime<Utc>,
) -> KeyspaceResult<bool> {
    diesel::select(diesel::dsl::exists(
        task_store_sets::table
            .filter(task_store_sets::set_key.eq(set_key))
            .filter(task_store_sets::expires_at.gt(now)),
    ))
    .get_result(connection)
    .map_err(map_diesel_error)
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> KeyspaceResult<DateTime<Utc>> {
    let window = chrono::Duration::from_std(ttl).map_err(KeyspaceError::backend)?;
    Ok(now + window)
}

fn map_diesel_error(err: DieselError) -> KeyspaceError {
    if matches!(
        err,
        DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand,
            _
        )
    ) {
        KeyspaceError::unavailable(err)
    } else {
        KeyspaceError::backend(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::adapters::memory::ManualClock;
    use eyre::{bail, ensure};
    use rstest::rstest;

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn calls_past_the_store_timeout_report_unavailable() -> eyre::Result<()> {
        let manager =
            ConnectionManager::<PgConnection>::new("postgres://taskrelay@127.0.0.1:1/taskrelay");
        let pool = Pool::builder()
            .connection_timeout(Duration::from_secs(1))
            .build_unchecked(manager);
        let keyspace = PostgresKeyspace::new(pool, Arc::new(ManualClock::default()))
            .with_timeout(Duration::from_millis(50));

        match keyspace.ping().await {
            Err(KeyspaceError::Unavailable(err)) => {
                ensure!(err.to_string().contains("timed out"), "unexpected error {err}");
            }
            other => bail!("expected a timeout, got {other:?}"),
        }
        Ok(())
    }
}
