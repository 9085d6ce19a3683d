//! Domain model for task dispatch tracking.
//!
//! The domain owns the task record, its status state machine and the log
//! wire format. Persistence, scheduling and queueing stay outside of the
//! domain boundary.

mod error;
mod ids;
mod log_entry;
mod record;
mod status;

pub use error::{
    ParseLogEntryError, ParseTaskPriorityError, ParseTaskStatusError, TaskDomainError,
};
pub use ids::{JobId, ServiceName, TaskId, UserId};
pub use log_entry::{LogEntry, TaskTimezone};
pub use record::{NewTask, ResultUpdate, TaskParameters, TaskPriority, TaskRecord, TaskResult};
pub use status::TaskStatus;
