//! The scheduler polls for due scheduled objectives and reacts to
//! filesystem/content events, turning both into idempotent [`Task`]s.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::{Objective, Task, TaskRouting, TaskSource, TaskStatus, TriggerType};
use crate::error::Result;
use crate::store::Store;
use crate::util;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const MAX_DUE_PER_POLL: usize = 20;
const EVENT_BUCKET_SECS: i64 = 30;

/// A live handle to a running scheduler; dropping it does not stop the
/// background task, use [`ObjectiveScheduler::stop`] for that.
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Polls [`Store::list_due_scheduled_objectives`] on an interval and
/// dispatches filesystem/content events to event-triggered objectives.
pub struct ObjectiveScheduler {
    store: Store,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl ObjectiveScheduler {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            running: Arc::new(RwLock::new(false)),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start the polling loop as a background task. Scheduled objectives
    /// whose `next_run_at` passed while the scheduler was stopped are
    /// picked up on the very first poll, so no separate recovery pass is
    /// needed for them; queued tasks are likewise re-claimable regardless
    /// of age.
    pub fn start(&self) -> SchedulerHandle {
        let store = self.store.clone();
        let interval = self.poll_interval;
        let running = Arc::clone(&self.running);

        let task = tokio::spawn(async move {
            *running.write().await = true;
            let mut ticker = tokio::time::interval(interval);
            while *running.read().await {
                ticker.tick().await;
                if let Err(e) = poll_once(&store).await {
                    error!(error = %e, "objective poll failed");
                }
            }
        });

        SchedulerHandle { task }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// React to a Markdown file changing: fan out to every active
    /// event-triggered objective listening for `markdown.updated`,
    /// deduping repeated events within a 30 second bucket per path.
    pub async fn handle_markdown_update(&self, workspace_id: &str, changed_path: &str) -> Result<usize> {
        handle_event(&self.store, workspace_id, "markdown.updated", changed_path).await
    }
}

async fn poll_once(store: &Store) -> Result<()> {
    let now = util::timestamp_secs();
    let due = store.list_due_scheduled_objectives(now, MAX_DUE_PER_POLL).await?;
    for mut objective in due {
        let run_key = format!("{}:{}", objective.id, objective.next_run_at.unwrap_or(now));
        let task = Task {
            id: util::generate_id("task"),
            workspace_id: objective.workspace_id.clone(),
            context_id: objective.context_id.clone(),
            kind: "objective".to_owned(),
            title: objective.title.clone(),
            prompt: objective.prompt.clone(),
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: None,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            run_key: Some(run_key),
            routing: TaskRouting::default(),
            source: TaskSource {
                connector: None,
                external_id: None,
                user_id: None,
                text: None,
                objective_id: Some(objective.id.clone()),
            },
            created_at: now,
            updated_at: now,
        };

        match store.create_task(&task).await {
            Ok(()) => debug!(objective = %objective.id, "scheduled task created"),
            Err(e) if e.kind() == crate::error::ErrorKind::IdempotencyConflict => {
                debug!(objective = %objective.id, "scheduled task already created this run");
            }
            Err(e) => {
                warn!(objective = %objective.id, error = %e, "failed to create scheduled task");
            }
        }

        advance_schedule(&mut objective, now);
        store.save_objective(&objective).await?;
    }
    Ok(())
}

fn advance_schedule(objective: &mut Objective, now: i64) {
    objective.last_run_at = Some(now);
    objective.run_count += 1;
    let Some(cron_expr) = &objective.cron_expr else {
        objective.active = false;
        return;
    };
    let Ok(schedule) = Schedule::from_str(cron_expr) else {
        objective.active = false;
        objective.last_error = Some(format!("invalid cron expression: {cron_expr}"));
        return;
    };
    objective.next_run_at = schedule.upcoming(Utc).next().map(|dt| dt.timestamp());
}

/// Fold a task's terminal outcome back onto the objective that spawned it:
/// success/failure streak, the bounded recent-error log, and, on repeated
/// failure, either a backoff-delayed `next_run_at` or an auto-pause.
///
/// No-op if the objective has since been deleted.
pub(crate) async fn record_task_outcome(
    store: &Store,
    objective_id: &str,
    duration_ms: i64,
    error: Option<String>,
) -> Result<()> {
    let Some(mut objective) = store.get_objective(objective_id).await? else {
        return Ok(());
    };
    let now = util::timestamp_secs();
    objective.total_run_duration_ms += duration_ms;

    match error {
        None => {
            objective.success_count += 1;
            objective.consecutive_successes += 1;
            objective.consecutive_failures = 0;
            objective.last_success_at = Some(now);
            objective.last_error = None;
        }
        Some(message) => {
            objective.failure_count += 1;
            objective.consecutive_failures += 1;
            objective.consecutive_successes = 0;
            objective.last_failure_at = Some(now);
            objective.last_error = Some(message.clone());
            objective.record_recent_error(message);

            if objective.should_auto_pause() {
                objective.auto_paused_reason = Some(format!(
                    "auto-paused after {} consecutive failures",
                    objective.consecutive_failures
                ));
                objective.active = false;
                objective.next_run_at = None;
            } else if objective.trigger_type == TriggerType::Schedule {
                objective.next_run_at = Some(now + objective.backoff_secs());
            }
        }
    }

    store.save_objective(&objective).await
}

async fn handle_event(store: &Store, workspace_id: &str, event_key: &str, subject: &str) -> Result<usize> {
    let objectives = store.list_objectives_for_event(event_key).await?;
    let now = util::timestamp_secs();
    let bucket = now / EVENT_BUCKET_SECS;
    let hash = short_hash(subject);

    let mut dispatched = 0;
    for objective in objectives {
        if objective.workspace_id != workspace_id {
            continue;
        }
        let run_key = format!("{}:{bucket}:{hash}", objective.id);
        let task = Task {
            id: util::generate_id("task"),
            workspace_id: objective.workspace_id.clone(),
            context_id: objective.context_id.clone(),
            kind: "objective".to_owned(),
            title: objective.title.clone(),
            prompt: objective.prompt.clone(),
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: None,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            run_key: Some(run_key),
            routing: TaskRouting::default(),
            source: TaskSource {
                connector: None,
                external_id: None,
                user_id: None,
                text: Some(subject.to_owned()),
                objective_id: Some(objective.id.clone()),
            },
            created_at: now,
            updated_at: now,
        };
        match store.create_task(&task).await {
            Ok(()) => dispatched += 1,
            Err(e) if e.kind() == crate::error::ErrorKind::IdempotencyConflict => {}
            Err(e) => return Err(e),
        }
    }
    Ok(dispatched)
}

fn short_hash(subject: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(subject.as_bytes());
    hasher.finalize().iter().take(3).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Objective, TriggerType};

    fn event_objective(workspace_id: &str) -> Objective {
        Objective {
            id: util::generate_id("obj"),
            workspace_id: workspace_id.to_owned(),
            context_id: "ctx_1".to_owned(),
            title: "watch notes".to_owned(),
            prompt: "summarize the change".to_owned(),
            trigger_type: TriggerType::Event,
            event_key: Some("markdown.updated".to_owned()),
            cron_expr: None,
            timezone: "UTC".to_owned(),
            active: true,
            next_run_at: None,
            last_run_at: None,
            last_error: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_run_duration_ms: 0,
            last_success_at: None,
            last_failure_at: None,
            auto_paused_reason: None,
            recent_errors: Vec::new(),
        }
    }

    #[test]
    fn short_hash_is_six_hex_chars() {
        assert_eq!(short_hash("notes.md").len(), 6);
    }

    #[tokio::test]
    async fn poll_once_stamps_objective_id_and_is_idempotent_per_run_key() {
        let store = Store::open_in_memory().await.expect("store");
        let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("workspace");
        let mut objective = scheduled_objective(&workspace.id);
        objective.context_id = workspace.id.clone();
        objective.next_run_at = Some(0);
        store.create_objective(&objective).await.expect("create objective");

        poll_once(&store).await.expect("first poll");
        let tasks = store.list_tasks_for_context(&workspace.id).await.expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source.objective_id.as_deref(), Some(objective.id.as_str()));

        // Re-run with the same next_run_at (simulating a second poll before
        // advance_schedule's write lands): the unique run_key must block a
        // duplicate task rather than erroring the poll.
        let mut stale = objective.clone();
        stale.next_run_at = Some(0);
        poll_once_for_objective(&store, &mut stale).await;
        let tasks_again = store.list_tasks_for_context(&workspace.id).await.expect("tasks");
        assert_eq!(tasks_again.len(), 1, "duplicate run_key must not enqueue twice");
    }

    /// Test-only helper exercising the same enqueue-then-advance sequence as
    /// `poll_once`, but for a single caller-supplied objective rather than
    /// everything `list_due_scheduled_objectives` returns.
    async fn poll_once_for_objective(store: &Store, objective: &mut Objective) {
        let now = util::timestamp_secs();
        let run_key = format!("{}:{}", objective.id, objective.next_run_at.unwrap_or(now));
        let task = Task {
            id: util::generate_id("task"),
            workspace_id: objective.workspace_id.clone(),
            context_id: objective.context_id.clone(),
            kind: "objective".to_owned(),
            title: objective.title.clone(),
            prompt: objective.prompt.clone(),
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: None,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            run_key: Some(run_key),
            routing: TaskRouting::default(),
            source: TaskSource {
                connector: None,
                external_id: None,
                user_id: None,
                text: None,
                objective_id: Some(objective.id.clone()),
            },
            created_at: now,
            updated_at: now,
        };
        let _ = store.create_task(&task).await;
        advance_schedule(objective, now);
        store.save_objective(objective).await.expect("save objective");
    }

    #[tokio::test]
    async fn handle_event_dispatches_once_per_bucket() {
        let store = Store::open_in_memory().await.expect("store");
        let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("workspace");
        let mut objective = event_objective(&workspace.id);
        objective.context_id = workspace.id.clone();
        store.create_objective(&objective).await.expect("create objective");

        let first = handle_event(&store, &workspace.id, "markdown.updated", "notes.md")
            .await
            .expect("first dispatch");
        assert_eq!(first, 1);

        let second = handle_event(&store, &workspace.id, "markdown.updated", "notes.md")
            .await
            .expect("second dispatch");
        assert_eq!(second, 0, "same bucket should be deduped");
    }

    fn scheduled_objective(workspace_id: &str) -> Objective {
        let mut objective = event_objective(workspace_id);
        objective.trigger_type = TriggerType::Schedule;
        objective.event_key = None;
        objective.cron_expr = Some("*/5 * * * *".to_owned());
        objective
    }

    #[tokio::test]
    async fn record_task_outcome_resets_streak_on_success() {
        let store = Store::open_in_memory().await.expect("store");
        let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("workspace");
        let mut objective = scheduled_objective(&workspace.id);
        objective.context_id = workspace.id.clone();
        objective.consecutive_failures = 3;
        store.create_objective(&objective).await.expect("create objective");

        record_task_outcome(&store, &objective.id, 150, None).await.expect("record outcome");

        let reloaded = store.get_objective(&objective.id).await.expect("get").expect("exists");
        assert_eq!(reloaded.consecutive_failures, 0);
        assert_eq!(reloaded.consecutive_successes, 1);
        assert_eq!(reloaded.success_count, 1);
        assert_eq!(reloaded.total_run_duration_ms, 150);
        assert!(reloaded.active);
    }

    #[tokio::test]
    async fn record_task_outcome_backs_off_then_auto_pauses() {
        let store = Store::open_in_memory().await.expect("store");
        let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("workspace");
        let mut objective = scheduled_objective(&workspace.id);
        objective.context_id = workspace.id.clone();
        store.create_objective(&objective).await.expect("create objective");

        let mut previous_next_run = 0;
        for n in 1..Objective::AUTO_PAUSE_THRESHOLD {
            record_task_outcome(&store, &objective.id, 10, Some(format!("boom {n}")))
                .await
                .expect("record outcome");
            let reloaded = store.get_objective(&objective.id).await.expect("get").expect("exists");
            assert_eq!(reloaded.consecutive_failures, n);
            assert!(reloaded.active, "should not auto-pause before the threshold");
            let next_run = reloaded.next_run_at.expect("backoff sets next_run_at");
            assert!(next_run >= previous_next_run, "backoff must be non-decreasing");
            previous_next_run = next_run;
        }

        record_task_outcome(&store, &objective.id, 10, Some("final straw".to_owned()))
            .await
            .expect("record outcome");
        let paused = store.get_objective(&objective.id).await.expect("get").expect("exists");
        assert_eq!(paused.consecutive_failures, Objective::AUTO_PAUSE_THRESHOLD);
        assert!(!paused.active);
        assert!(paused.next_run_at.is_none());
        assert!(paused.auto_paused_reason.is_some());
        assert_eq!(paused.recent_errors.last().map(String::as_str), Some("final straw"));
    }

    #[tokio::test]
    async fn handle_event_ignores_objectives_in_other_workspaces() {
        let store = Store::open_in_memory().await.expect("store");
        let workspace = store.create_workspace("ws", "/tmp/ws").await.expect("workspace");
        let other = store.create_workspace("ws2", "/tmp/ws2").await.expect("workspace");
        let mut objective = event_objective(&workspace.id);
        objective.context_id = workspace.id.clone();
        store.create_objective(&objective).await.expect("create objective");

        let dispatched = handle_event(&store, &other.id, "markdown.updated", "notes.md")
            .await
            .expect("dispatch");
        assert_eq!(dispatched, 0);
    }
}
