//! When steps for task dispatch BDD scenarios.

use super::world::{DispatchWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use taskrelay::task::{
    domain::UserId,
    services::{SubmitTaskRequest, TaskOutcome, TaskScope},
};

fn scope_for(world: &DispatchWorld, user: String) -> Result<TaskScope, eyre::Report> {
    Ok(TaskScope::User {
        service: world.task()?.service().clone(),
        user_id: UserId::new(user)?,
    })
}

#[when(r#"user "{user}" submits a task to service "{service}""#)]
fn submit_task(world: &mut DispatchWorld, user: String, service: String) -> Result<(), eyre::Report> {
    let submitted = run_async(world.service()?.submit(SubmitTaskRequest::new(service, user)))
        .wrap_err("submit task in scenario")?;
    world.last_task = Some(submitted);
    Ok(())
}

#[when(r#"user "{user}" cancels the task"#)]
fn cancel_task(world: &mut DispatchWorld, user: String) -> Result<(), eyre::Report> {
    let scope = scope_for(world, user)?;
    let task_id = world.task()?.task_id().clone();
    match run_async(world.service()?.cancel_task(&scope, &task_id)) {
        Ok(_) => world.last_error = None,
        Err(err) => world.last_error = Some(err),
    }
    Ok(())
}

#[when(r#"user "{user}" looks up the task"#)]
fn look_up_task(world: &mut DispatchWorld, user: String) -> Result<(), eyre::Report> {
    let scope = scope_for(world, user)?;
    let task_id = world.task()?.task_id().clone();
    if let Err(err) = run_async(world.service()?.get_task(&scope, &task_id)) {
        world.last_error = Some(err);
    }
    Ok(())
}

#[when(r#"the executor reports failure "{reason}""#)]
fn executor_reports_failure(world: &mut DispatchWorld, reason: String) -> Result<(), eyre::Report> {
    let task_id = world.task()?.task_id().clone();
    let updated = run_async(
        world
            .service()?
            .record_outcome(&task_id, TaskOutcome::Failed { reason }),
    )
    .wrap_err("record executor outcome in scenario")?;
    world.last_task = Some(updated);
    Ok(())
}
