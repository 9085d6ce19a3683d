//! Logical key layout shared by every keyspace-backed repository.
//!
//! | Key | Kind | Contents |
//! |---|---|---|
//! | `task:{task_id}` | value | serialized task record |
//! | `index:tasks` | set | all known task ids |
//! | `index:service:{service}` | set | task ids owned by a service |
//! | `index:service:{service}:users` | set | user ids with tasks in a service |
//! | `index:service:{service}:user:{user_id}` | set | task ids of one user |
//! | `task:id:sequence` | counter | source of new task ids |

use crate::task::domain::{ServiceName, TaskId, UserId};

/// Global index of every task id.
pub const ALL_TASKS_INDEX: &str = "index:tasks";

/// Counter backing task id allocation.
pub const TASK_SEQUENCE: &str = "task:id:sequence";

/// Primary key of a task record.
#[must_use]
pub fn task_key(task_id: &TaskId) -> String {
    format!("task:{task_id}")
}

/// Index of task ids owned by `service`.
#[must_use]
pub fn service_index(service: &ServiceName) -> String {
    format!("index:service:{service}")
}

/// Index of user ids holding tasks in `service`.
#[must_use]
pub fn service_users_index(service: &ServiceName) -> String {
    format!("index:service:{service}:users")
}

/// Index of task ids owned by `service` and submitted by `user_id`.
#[must_use]
pub fn service_user_index(service: &ServiceName, user_id: &UserId) -> String {
    format!("index:service:{service}:user:{user_id}")
}
