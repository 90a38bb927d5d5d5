//! Drives [`TaskWorker`] end to end through the public API: claiming a
//! queued task, running it through a real [`AgentLoop`] against a scripted
//! model, and folding the outcome back onto the originating objective.
//!
//! Uses `tokio_test`'s paused clock to advance the worker's poll interval
//! deterministically instead of sleeping in wall-clock time.

#[path = "support/mod.rs"]
mod support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use overseer::agent::AgentLoop;
use overseer::domain::Policy;
use overseer::objectives::TaskWorker;
use overseer::store::Store;
use overseer::tools::ToolRegistry;
use support::ScriptedModel;

#[tokio::test]
async fn successful_task_completes_and_updates_objective_streak() {
    let store = Store::open_in_memory().await.expect("open store");
    let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("create workspace");
    let objective = support::scheduled_objective(&workspace.id);
    store.create_objective(&objective).await.expect("create objective");

    let task = support::objective_task(&workspace.id, &workspace.id, &objective.id, "run-1");
    let task_id = task.id.clone();
    store.create_task(&task).await.expect("create task");

    let model = Arc::new(ScriptedModel::succeeding("summary: all quiet"));
    let agent_loop = Arc::new(AgentLoop::new(model.clone(), Arc::new(ToolRegistry::new()), store.clone(), Policy::default()));
    let worker = Arc::new(TaskWorker::new(store.clone(), agent_loop, "worker-1", PathBuf::from("/tmp/ws")).with_poll_interval(Duration::from_millis(10)));

    tokio_test::time::pause();
    let handle = worker.clone().start();
    let store_check = store.clone();
    let objective_id_check = objective.id.clone();
    // Gate on the objective row rather than the task row: `record_task_outcome`
    // writes it after `complete_task`, on the same connection, so observing
    // it here guarantees the task's terminal state is already durable too.
    support::advance_until(
        || {
            let store_check = store_check.clone();
            let objective_id_check = objective_id_check.clone();
            async move {
                store_check
                    .get_objective(&objective_id_check)
                    .await
                    .expect("get objective")
                    .is_some_and(|o| o.success_count > 0)
            }
        },
        Duration::from_millis(10),
        200,
    )
    .await;
    handle.abort();

    assert!(model.call_count() > 0, "the scripted model must have been invoked");
    let finished = store.get_task(&task_id).await.expect("get task").expect("task exists");
    assert_eq!(finished.status, overseer::domain::TaskStatus::Succeeded);
    assert_eq!(finished.result_summary.as_deref(), Some("summary: all quiet"));

    let reloaded = store.get_objective(&objective.id).await.expect("get objective").expect("objective exists");
    assert_eq!(reloaded.consecutive_successes, 1);
    assert_eq!(reloaded.success_count, 1);
    assert_eq!(reloaded.consecutive_failures, 0);
}

#[tokio::test]
async fn repeated_failures_auto_pause_the_objective() {
    let store = Store::open_in_memory().await.expect("open store");
    let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("create workspace");
    let mut objective = support::scheduled_objective(&workspace.id);
    objective.next_run_at = None;
    store.create_objective(&objective).await.expect("create objective");

    // Enqueue more failures than the auto-pause threshold so the worker has
    // something to claim at every retry; only the first
    // `Objective::AUTO_PAUSE_THRESHOLD` will actually be needed.
    for i in 0..overseer::domain::Objective::AUTO_PAUSE_THRESHOLD {
        let run_key = format!("run-{i}");
        let task = support::objective_task(&workspace.id, &workspace.id, &objective.id, &run_key);
        store.create_task(&task).await.expect("create task");
    }

    let model = Arc::new(ScriptedModel::failing());
    let agent_loop = Arc::new(AgentLoop::new(model.clone(), Arc::new(ToolRegistry::new()), store.clone(), Policy::default()));
    let worker = Arc::new(TaskWorker::new(store.clone(), agent_loop, "worker-1", PathBuf::from("/tmp/ws")).with_poll_interval(Duration::from_millis(10)));

    tokio_test::time::pause();
    let handle = worker.clone().start();
    let objective_id = objective.id.clone();
    let store_check = store.clone();
    support::advance_until(
        || {
            let store_check = store_check.clone();
            let objective_id = objective_id.clone();
            async move {
                store_check
                    .get_objective(&objective_id)
                    .await
                    .expect("get objective")
                    .is_some_and(|o| !o.active)
            }
        },
        Duration::from_millis(10),
        200,
    )
    .await;
    handle.abort();

    let reloaded = store.get_objective(&objective.id).await.expect("get objective").expect("objective exists");
    assert!(!reloaded.active, "objective must auto-pause once the failure streak hits the threshold");
    assert_eq!(reloaded.consecutive_failures, overseer::domain::Objective::AUTO_PAUSE_THRESHOLD);
    assert!(reloaded.auto_paused_reason.is_some());
    assert!(reloaded.next_run_at.is_none());
}
