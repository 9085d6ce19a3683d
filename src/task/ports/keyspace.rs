//! Key/value store port backing the task repository.
//!
//! The keyspace offers the primitives the repository needs: string values,
//! string sets and a monotonic counter. Values and sets carry a time-to-live
//! that the writer refreshes; an expired key behaves exactly as if it had
//! never been written.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for keyspace operations.
pub type KeyspaceResult<T> = Result<T, KeyspaceError>;

/// Storage primitives with sliding expiry.
#[async_trait]
pub trait Keyspace: Send + Sync {
    /// Reads a live value.
    async fn get(&self, key: &str) -> KeyspaceResult<Option<String>>;

    /// Reads many live values, preserving the order of `keys`.
    async fn get_many(&self, keys: &[String]) -> KeyspaceResult<Vec<Option<String>>>;

    /// Writes a value and sets its expiry to `ttl` from now.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> KeyspaceResult<()>;

    /// Removes a value. Returns `true` when a live value was removed.
    async fn remove(&self, key: &str) -> KeyspaceResult<bool>;

    /// Adds `member` to the set at `key` and refreshes the whole set's expiry
    /// to `ttl` from now. An expired set is recreated empty first.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> KeyspaceResult<()>;

    /// Removes `members` from the set at `key`. Missing members are ignored.
    async fn set_remove(&self, key: &str, members: &[String]) -> KeyspaceResult<()>;

    /// Returns the members of a live set.
    async fn set_members(&self, key: &str) -> KeyspaceResult<Vec<String>>;

    /// Returns the number of members of a live set.
    async fn set_len(&self, key: &str) -> KeyspaceResult<usize>;

    /// Atomically increments the counter at `key`, starting from zero, and
    /// returns the new value. Counters never expire.
    async fn increment(&self, key: &str) -> KeyspaceResult<u64>;

    /// Physically drops expired values and set members. Returns the number of
    /// entries removed.
    async fn purge_expired(&self) -> KeyspaceResult<u64>;

    /// Round-trips the store.
    async fn ping(&self) -> KeyspaceResult<()>;
}

#[async_trait]
impl<K> Keyspace for Arc<K>
where
    K: Keyspace + ?Sized,
{
    async fn get(&self, key: &str) -> KeyspaceResult<Option<String>> {
        (**self).get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> KeyspaceResult<Vec<Option<String>>> {
        (**self).get_many(keys).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> KeyspaceResult<()> {
        (**self).put(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> KeyspaceResult<bool> {
        (**self).remove(key).await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> KeyspaceResult<()> {
        (**self).set_add(key, member, ttl).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> KeyspaceResult<()> {
        (**self).set_remove(key, members).await
    }

    async fn set_members(&self, key: &str) -> KeyspaceResult<Vec<String>> {
        (**self).set_members(key).await
    }

    async fn set_len(&self, key: &str) -> KeyspaceResult<usize> {
        (**self).set_len(key).await
    }

    async fn increment(&self, key: &str) -> KeyspaceResult<u64> {
        (**self).increment(key).await
    }

    async fn purge_expired(&self) -> KeyspaceResult<u64> {
        (**self).purge_expired().await
    }

    async fn ping(&self) -> KeyspaceResult<()> {
        (**self).ping().await
    }
}

/// Errors returned by keyspace implementations.
#[derive(Debug, Clone, Error)]
pub enum KeyspaceError {
    /// The store could not be reached.
    #[error("keyspace unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// The store rejected or failed the operation.
    #[error("keyspace backend error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl KeyspaceError {
    /// Wraps a connectivity error.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }

    /// Wraps a backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
