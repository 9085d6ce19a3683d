//! Asynchronous dispatch of submissions and cancellations to the scheduler.

mod processor;
mod worker;

pub use processor::{
    DispatchOrdering, DrainReport, EventProcessor, EventProcessorConfig, EventProcessorError,
};
pub use worker::{CANCELLED_LOG, DISPATCHING_LOG, DispatchOutcome, DispatchWorker};
