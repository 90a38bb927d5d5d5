//! Shared fixtures for the integration tests in this directory.
//!
//! Lives under `tests/support/` rather than directly in `tests/` so cargo
//! does not treat it as its own test binary; each test file pulls it in
//! with `#[path = "support/mod.rs"] mod support;`.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use overseer::domain::{Objective, Task, TaskRouting, TaskSource, TaskStatus, TriggerType};
use overseer::util;
use overseer_core::completion::{FinishReason, GenerateOptions, Message, ModelResponse, TokenUsage};
use overseer_core::error::ModelError;
use overseer_core::model::Model;

/// A [`Model`] that always returns the same scripted outcome, counting how
/// many times it was called.
pub struct ScriptedModel {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Always resolves with `reply` as a final answer (no tool calls).
    #[must_use]
    pub fn succeeding(reply: impl Into<String>) -> Self {
        Self { reply: Some(reply.into()), calls: AtomicUsize::new(0) }
    }

    /// Always fails with a provider error, as if the upstream API rejected
    /// the request.
    #[must_use]
    pub fn failing() -> Self {
        Self { reply: None, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted-test-model"
    }

    async fn generate(&self, _messages: &[Message], _options: &GenerateOptions) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(text) => Ok(ModelResponse {
                content: text.clone(),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
                usage: TokenUsage::default(),
            }),
            None => Err(ModelError::Provider { status: 503, body: "scripted failure".to_owned() }),
        }
    }
}

/// A schedule-triggered objective due immediately, with every counter at
/// its zero value.
#[must_use]
pub fn scheduled_objective(workspace_id: &str) -> Objective {
    Objective {
        id: util::generate_id("obj"),
        workspace_id: workspace_id.to_owned(),
        context_id: workspace_id.to_owned(),
        title: "nightly digest".to_owned(),
        prompt: "summarize today's notes".to_owned(),
        trigger_type: TriggerType::Schedule,
        event_key: None,
        cron_expr: Some("*/5 * * * *".to_owned()),
        timezone: "UTC".to_owned(),
        active: true,
        next_run_at: Some(0),
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

/// A queued task already attributed to `objective_id`, as if the scheduler
/// had just created it.
#[must_use]
pub fn objective_task(workspace_id: &str, context_id: &str, objective_id: &str, run_key: &str) -> Task {
    let now = util::timestamp_secs();
    Task {
        id: util::generate_id("task"),
        workspace_id: workspace_id.to_owned(),
        context_id: context_id.to_owned(),
        kind: "objective".to_owned(),
        title: "nightly digest".to_owned(),
        prompt: "summarize today's notes".to_owned(),
        status: TaskStatus::Queued,
        attempts: 0,
        worker_id: None,
        started_at: None,
        finished_at: None,
        result_summary: None,
        result_path: None,
        error_message: None,
        run_key: Some(run_key.to_owned()),
        routing: TaskRouting::default(),
        source: TaskSource {
            connector: None,
            external_id: None,
            user_id: None,
            text: None,
            objective_id: Some(objective_id.to_owned()),
        },
        created_at: now,
        updated_at: now,
    }
}

/// Poll `condition` (a real async check against the store), advancing the
/// paused tokio clock by `step` between attempts, until it returns `true`
/// or `max_steps` is exhausted.
///
/// Each call to `condition` performs a real await, giving the executor a
/// chance to interleave the background task driven by the ticks we
/// advance through; this is more robust than a single `advance` call
/// followed by one assertion.
pub async fn advance_until<F, Fut>(mut condition: F, step: Duration, max_steps: usize)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..max_steps {
        if condition().await {
            return;
        }
        tokio_test::time::advance(step).await;
    }
    panic!("condition not reached after {max_steps} advances of {step:?}");
}
