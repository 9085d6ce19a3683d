//! HTTP adapters for the downstream scheduler.

mod scheduler;

pub use scheduler::{HttpSchedulerClient, HttpSchedulerConfig};
