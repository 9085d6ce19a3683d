//! Task status values and the dispatch state machine.

use super::ParseTaskStatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been persisted but not yet picked up by a worker.
    Pending,
    /// A worker is handing the task to the scheduler.
    Dispatching,
    /// The scheduler accepted the task.
    Running,
    /// The scheduler reported terminal success.
    Completed,
    /// Dispatch failed or the scheduler reported terminal failure.
    Failed,
    /// The scheduler acknowledged a cancellation.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Dispatching,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` when no further transition is valid.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` when moving from `self` to `target` is permitted.
    ///
    /// ```text
    /// Pending     -> Dispatching | Cancelled
    /// Dispatching -> Running | Failed | Cancelled
    /// Running     -> Completed | Failed | Cancelled
    /// ```
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Dispatching | Self::Cancelled)
                | (
                    Self::Dispatching,
                    Self::Running | Self::Failed | Self::Cancelled
                )
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseTaskStatusError(value.to_owned()))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
