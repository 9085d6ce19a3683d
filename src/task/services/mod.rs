//! Application services for task orchestration.

mod orchestrator;

pub use orchestrator::{
    SubmitTaskRequest, TaskOutcome, TaskScope, TaskService, TaskServiceError, TaskServiceResult,
};
