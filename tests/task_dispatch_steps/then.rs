//! Then steps for task dispatch BDD scenarios.

use super::world::{DispatchWorld, run_async};
use rstest_bdd_macros::then;
use taskrelay::task::{domain::TaskStatus, services::TaskServiceError};

fn parse_status(raw: &str) -> Result<TaskStatus, eyre::Report> {
    TaskStatus::try_from(raw).map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))
}

#[then(r#"the returned task is "{status}""#)]
fn returned_task_is(world: &DispatchWorld, status: String) -> Result<(), eyre::Report> {
    let expected = parse_status(&status)?;
    let task = world.task()?;
    if task.status() != expected {
        return Err(eyre::eyre!("expected {expected}, found {}", task.status()));
    }
    Ok(())
}

#[then(r#"the task eventually becomes "{status}""#)]
fn task_eventually_becomes(world: &mut DispatchWorld, status: String) -> Result<(), eyre::Report> {
    let expected = parse_status(&status)?;
    let record = run_async(world.wait_for(expected))?;
    world.last_task = Some(record);
    Ok(())
}

#[then(r#"the task lists job "{job_id}""#)]
fn task_lists_job(world: &DispatchWorld, job_id: String) -> Result<(), eyre::Report> {
    let task = world.task()?;
    if !task.jobs().iter().any(|job| job.as_str() == job_id) {
        return Err(eyre::eyre!("job {job_id} missing from {:?}", task.jobs()));
    }
    Ok(())
}

#[then(r#"the last log line is "{message}""#)]
fn last_log_line_is(world: &DispatchWorld, message: String) -> Result<(), eyre::Report> {
    let task = world.task()?;
    let last = task.logs().last().map(|entry| entry.message());
    if last != Some(message.as_str()) {
        return Err(eyre::eyre!("expected last log {message:?}, found {last:?}"));
    }
    Ok(())
}

#[then("the cancellation is rejected because the task is finished")]
fn cancellation_rejected(world: &DispatchWorld) -> Result<(), eyre::Report> {
    if !matches!(world.last_error, Some(TaskServiceError::AlreadyTerminal { .. })) {
        return Err(eyre::eyre!(
            "expected AlreadyTerminal error, got {:?}",
            world.last_error
        ));
    }
    Ok(())
}

#[then("the lookup reports the task as missing")]
fn lookup_reports_missing(world: &DispatchWorld) -> Result<(), eyre::Report> {
    if !matches!(world.last_error, Some(TaskServiceError::NotFound(_))) {
        return Err(eyre::eyre!(
            "expected NotFound error, got {:?}",
            world.last_error
        ));
    }
    Ok(())
}
