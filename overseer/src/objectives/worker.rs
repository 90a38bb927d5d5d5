//! Claims queued [`Task`]s and runs them through an [`AgentLoop`], writing
//! back terminal status and, for tasks spawned from an objective, folding
//! the outcome into that objective's backoff/auto-pause bookkeeping.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use overseer_core::model::Model;

use crate::agent::{AgentLoop, ExecuteContext, ExecuteInput};
use crate::domain::Task;
use crate::error::Result;
use crate::store::Store;

use super::scheduler::record_task_outcome;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

/// A live handle to a running [`TaskWorker`]; dropping it does not stop the
/// background task, use [`TaskWorkerHandle::abort`] for that.
pub struct TaskWorkerHandle {
    task: JoinHandle<()>,
}

impl TaskWorkerHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Polls [`Store::claim_next_task`] on an interval. Each claimed task runs
/// to completion through the agent loop before the next claim, so one
/// `TaskWorker` is a single execution lane; run several (distinct
/// `worker_id`s) for concurrency.
pub struct TaskWorker<M: Model + Send + Sync + 'static> {
    store: Store,
    agent_loop: Arc<AgentLoop<M>>,
    worker_id: String,
    workspace_root: PathBuf,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl<M: Model + Send + Sync + 'static> TaskWorker<M> {
    #[must_use]
    pub fn new(
        store: Store,
        agent_loop: Arc<AgentLoop<M>>,
        worker_id: impl Into<String>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            store,
            agent_loop,
            worker_id: worker_id.into(),
            workspace_root,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            running: Arc::new(RwLock::new(false)),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start the claim loop as a background task.
    pub fn start(self: Arc<Self>) -> TaskWorkerHandle {
        let worker = Arc::clone(&self);
        let running = Arc::clone(&self.running);
        let interval = self.poll_interval;

        let task = tokio::spawn(async move {
            *running.write().await = true;
            let mut ticker = tokio::time::interval(interval);
            while *running.read().await {
                ticker.tick().await;
                if let Err(e) = worker.poll_once().await {
                    error!(error = %e, "task worker poll failed");
                }
            }
        });

        TaskWorkerHandle { task }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Drain the queue: claim and run tasks until none are left.
    async fn poll_once(&self) -> Result<()> {
        while let Some(task) = self.store.claim_next_task(&self.worker_id).await? {
            self.run_claimed_task(task).await;
        }
        Ok(())
    }

    async fn run_claimed_task(&self, task: Task) {
        let started = Instant::now();
        let exec_ctx = ExecuteContext {
            workspace_id: task.workspace_id.clone(),
            context_id: task.context_id.clone(),
            connector: task.source.connector.clone().unwrap_or_else(|| "task".to_owned()),
            external_id: task.source.external_id.clone().unwrap_or_else(|| task.id.clone()),
            requester_user_id: task.source.user_id.clone().unwrap_or_else(|| "system".to_owned()),
            workspace_root: self.workspace_root.clone(),
            approval_token: None,
        };
        let input = ExecuteInput::new(task.prompt.clone());

        let outcome_error = match self.agent_loop.execute(&exec_ctx, None, input).await {
            Ok(outcome) if !outcome.blocked && outcome.error.is_none() => {
                if let Err(e) = self
                    .store
                    .complete_task(&task.id, &self.worker_id, Some(&outcome.reply), None)
                    .await
                {
                    error!(error = %e, task = %task.id, "failed to record task completion");
                }
                None
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .or(outcome.block_reason)
                    .unwrap_or_else(|| "turn did not complete".to_owned());
                if let Err(e) = self.store.fail_task(&task.id, &self.worker_id, &message).await {
                    error!(error = %e, task = %task.id, "failed to record task failure");
                }
                Some(message)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(store_err) = self.store.fail_task(&task.id, &self.worker_id, &message).await {
                    error!(error = %store_err, task = %task.id, "failed to record task failure");
                }
                Some(message)
            }
        };

        if let Some(objective_id) = task.source.objective_id.as_deref() {
            let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
            if let Err(e) = record_task_outcome(&self.store, objective_id, duration_ms, outcome_error).await {
                error!(error = %e, objective = %objective_id, "failed to update objective bookkeeping");
            }
        }
        debug!(task = %task.id, worker = %self.worker_id, "task finished");
    }
}
