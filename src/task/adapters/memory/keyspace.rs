//! Process-local keyspace with clock-driven expiry.

use crate::task::ports::{Keyspace, KeyspaceError, KeyspaceResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Thread-safe in-memory keyspace.
///
/// Expiry is evaluated lazily against the injected clock, so tests can move
/// time forward without sleeping.
pub struct InMemoryKeyspace<C = DefaultClock> {
    state: Arc<RwLock<KeyspaceState>>,
    clock: Arc<C>,
}

impl<C> Clone for InMemoryKeyspace<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl Default for InMemoryKeyspace<DefaultClock> {
    fn default() -> Self {
        Self::new(Arc::new(DefaultClock))
    }
}

#[derive(Debug, Default)]
struct KeyspaceState {
    values: HashMap<String, Expiring<String>>,
    sets: HashMap<String, Expiring<BTreeSet<String>>>,
    counters: HashMap<String, u64>,
}

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

impl<C: Clock + Send + Sync> InMemoryKeyspace<C> {
    /// Creates an empty keyspace reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        Self {
            state: Arc::new(RwLock::new(KeyspaceState::default())),
            clock,
        }
    }

    fn read(&self) -> KeyspaceResult<RwLockReadGuard<'_, KeyspaceState>> {
        self.state
            .read()
            .map_err(|err| KeyspaceError::backend(std::io::Error::other(err.to_string())))
    }

    fn write(&self) -> KeyspaceResult<RwLockWriteGuard<'_, KeyspaceState>> {
        self.state
            .write()
            .map_err(|err| KeyspaceError::backend(std::io::Error::other(err.to_string())))
    }

    fn expiry(&self, ttl: Duration) -> KeyspaceResult<DateTime<Utc>> {
        let window = chrono::Duration::from_std(ttl).map_err(KeyspaceError::backend)?;
        Ok(self.clock.utc() + window)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> Keyspace for InMemoryKeyspace<C> {
    async fn get(&self, key: &str) -> KeyspaceResult<Option<String>> {
        let now = self.clock.utc();
        let state = self.read()?;
        Ok(state
            .values
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn get_many(&self, keys: &[String]) -> KeyspaceResult<Vec<Option<String>>> {
        let now = self.clock.utc();
        let state = self.read()?;
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .values
                    .get(key)
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> KeyspaceResult<()> {
        let expires_at = self.expiry(ttl)?;
        let mut state = self.write()?;
        state.values.insert(
            key.to_owned(),
            Expiring {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> KeyspaceResult<bool> {
        let now = self.clock.utc();
        let mut state = self.write()?;
        Ok(state
            .values
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> KeyspaceResult<()> {
        let now = self.clock.utc();
        let expires_at = self.expiry(ttl)?;
        let mut state = self.write()?;
        let entry = state
            .sets
            .entry(key.to_owned())
            .or_insert_with(|| Expiring {
                value: BTreeSet::new(),
                expires_at,
            });
        if !entry.is_live(now) {
            entry.value.clear();
        }
        entry.value.insert(member.to_owned());
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> KeyspaceResult<()> {
        let mut state = self.write()?;
        if let Some(entry) = state.sets.get_mut(key) {
            for member in members {
                entry.value.remove(member);
            }
            if entry.value.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> KeyspaceResult<Vec<String>> {
        let now = self.clock.utc();
        let state = self.read()?;
        Ok(state
            .sets
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_len(&self, key: &str) -> KeyspaceResult<usize> {
        let now = self.clock.utc();
        let state = self.read()?;
        Ok(state
            .sets
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map_or(0, |entry| entry.value.len()))
    }

    async fn increment(&self, key: &str) -> KeyspaceResult<u64> {
        let mut state = self.write()?;
        let counter = state.counters.entry(key.to_owned()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn purge_expired(&self) -> KeyspaceResult<u64> {
        let now = self.clock.utc();
        let mut state = self.write()?;
        let mut purged = 0_u64;

        state.values.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                purged += 1;
            }
            live
        });
        state.sets.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                purged += u64::try_from(entry.value.len()).unwrap_or(u64::MAX);
            }
            live
        });
        Ok(purged)
    }

    async fn ping(&self) -> KeyspaceResult<()> {
        self.read().map(|_| ())
    }
}
