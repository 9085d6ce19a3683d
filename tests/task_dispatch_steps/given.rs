//! Given steps for task dispatch BDD scenarios.

use super::world::DispatchWorld;
use eyre::WrapErr;
use rstest_bdd_macros::given;
use taskrelay::task::{
    domain::{JobId, TaskId},
    ports::{SchedulerError, SubmitReceipt},
};

#[given(r#"the scheduler accepts task "{task_id}" as job "{job_id}""#)]
fn scheduler_accepts(
    world: &mut DispatchWorld,
    task_id: String,
    job_id: String,
) -> Result<(), eyre::Report> {
    world.scheduler.script_submit(
        &TaskId::new(task_id)?,
        Ok(SubmitReceipt::with_job(JobId::new(job_id)?)),
    );
    Ok(())
}

#[given(r#"the scheduler rejects task "{task_id}" with status {status:u16}"#)]
fn scheduler_rejects(
    world: &mut DispatchWorld,
    task_id: String,
    status: u16,
) -> Result<(), eyre::Report> {
    world.scheduler.script_submit(
        &TaskId::new(task_id)?,
        Err(SchedulerError::Rejected {
            url: "http://scheduler/task".to_owned(),
            status,
            body: "rejected in scenario".to_owned(),
        }),
    );
    Ok(())
}

#[given("a running dispatch pipeline")]
fn running_pipeline(world: &mut DispatchWorld) -> Result<(), eyre::Report> {
    world.start().wrap_err("start event processor for scenario")?;
    Ok(())
}
