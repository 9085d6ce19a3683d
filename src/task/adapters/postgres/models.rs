//! Diesel row models for the task keyspace.

use super::schema::{task_store_set_members, task_store_sets, task_store_values};
use chrono::{DateTime, Utc};
use diesel::prelude::*;

/// Insert model for keyspace values.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_store_values)]
pub struct ValueRow<'a> {
    /// Logical key.
    pub key: &'a str,
    /// Serialized value.
    pub payload: &'a str,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Insert model for a set's expiry row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_store_sets)]
pub struct SetRow<'a> {
    /// Logical key of the set.
    pub set_key: &'a str,
    /// Expiry shared by every member.
    pub expires_at: DateTime<Utc>,
}

/// Insert model for set members.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_store_set_members)]
pub struct SetMemberRow<'a> {
    pub set_key: &'a str,
    pub member: &'a str,
}
