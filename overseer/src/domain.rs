//! Persisted domain entities: the rows the [`crate::store`] reads and
//! writes, plus the in-memory aggregates (`Policy`, a turn's `ToolCall`
//! trace) that live only for the duration of one `Execute` call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Where a task's routing (scheduling priority, execution lane) is decided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRouting {
    pub class: Option<String>,
    pub priority: Option<i64>,
    pub due_at: Option<i64>,
    pub lane: Option<String>,
}

/// Where a task originated: the connector message (or scheduler) that
/// created it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSource {
    pub connector: Option<String>,
    pub external_id: Option<String>,
    pub user_id: Option<String>,
    pub text: Option<String>,
    /// Set when the scheduler created this task on behalf of an
    /// [`Objective`]; lets the task worker report the run's outcome back
    /// onto that objective's failure streak.
    #[serde(default)]
    pub objective_id: Option<String>,
}

/// A unit of work the agent loop executes: one `Execute` call from start to
/// terminal state.
///
/// Invariant: `status == Running` implies `worker_id` is set and
/// `started_at` is non-zero. Status transitions form the DAG
/// `queued -> running -> {succeeded, failed} -> queued` (requeue on
/// retryable failure). Completion writes are conditioned on
/// `(id, status = running, worker_id = w)` so two workers racing to
/// complete the same task cannot both win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub kind: String,
    pub title: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub attempts: i64,
    pub worker_id: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub result_summary: Option<String>,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    /// Idempotency key. `Some(run_key)` collisions are rejected by a unique
    /// index rather than checked in application code.
    pub run_key: Option<String>,
    pub routing: TaskRouting,
    pub source: TaskSource,
    pub created_at: i64,
    pub updated_at: i64,
}

/// How an [`Objective`] is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Schedule,
    Event,
}

/// A standing instruction that periodically (or on event) produces `Task`s.
///
/// Invariant: `trigger_type == Schedule` implies `cron_expr` is set;
/// `trigger_type == Event` implies `event_key` is set and `next_run_at` is
/// unset (event objectives have no polled schedule). `recent_errors` is a
/// bounded FIFO capped at 5 entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub title: String,
    pub prompt: String,
    pub trigger_type: TriggerType,
    pub event_key: Option<String>,
    pub cron_expr: Option<String>,
    pub timezone: String,
    pub active: bool,
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub last_error: Option<String>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub consecutive_failures: i64,
    pub consecutive_successes: i64,
    pub total_run_duration_ms: i64,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub auto_paused_reason: Option<String>,
    pub recent_errors: Vec<String>,
}

/// Bound recent_errors to at most 5 entries, evicting the oldest.
pub const RECENT_ERRORS_CAP: usize = 5;

impl Objective {
    /// Number of consecutive failures after which the objective is
    /// automatically paused.
    pub const AUTO_PAUSE_THRESHOLD: i64 = 5;

    /// Push a failure onto the bounded `recent_errors` FIFO.
    pub fn record_recent_error(&mut self, message: impl Into<String>) {
        self.recent_errors.push(message.into());
        while self.recent_errors.len() > RECENT_ERRORS_CAP {
            self.recent_errors.remove(0);
        }
    }

    /// Backoff delay before the next retry, `min(30m, 1m * 2^(k-1))` where
    /// `k` is `consecutive_failures`.
    #[must_use]
    pub fn backoff_secs(&self) -> i64 {
        if self.consecutive_failures <= 0 {
            return 0;
        }
        let k = self.consecutive_failures.min(63) as u32;
        let exp = 60_i64.saturating_mul(1_i64 << (k - 1).min(62));
        exp.min(30 * 60)
    }

    /// Whether this objective should be auto-paused given its current
    /// failure streak.
    #[must_use]
    pub fn should_auto_pause(&self) -> bool {
        self.consecutive_failures >= Self::AUTO_PAUSE_THRESHOLD
    }
}

/// Approval status of an [`ActionApproval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// Execution status of an approved [`ActionApproval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    NotExecuted,
    Succeeded,
    Failed,
}

/// A sensitive action gated behind human approval before an executor plugin
/// runs it.
///
/// Transitions: `pending -> approved -> {succeeded, failed}` (via
/// `execution_status`) or `pending -> denied`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionApproval {
    pub id: String,
    pub workspace_id: String,
    pub context_id: String,
    pub connector: String,
    pub external_id: String,
    pub requester_user_id: String,
    pub action_type: String,
    pub action_target: Option<String>,
    pub action_summary: Option<String>,
    pub payload: Map<String, Value>,
    pub status: ApprovalStatus,
    pub approver_user_id: Option<String>,
    pub denied_reason: Option<String>,
    pub execution_status: ExecutionStatus,
    pub execution_message: Option<String>,
    pub executor_plugin: Option<String>,
    pub executed_at: Option<i64>,
}

/// Turn-level execution limits, merged from a default plus a per-context
/// override before each `Execute` call.
///
/// Absent `allowed_tools`/`allowed_tool_classes` means "all allowed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub max_loop_steps: u32,
    pub max_tool_calls_per_turn: u32,
    pub max_input_chars: usize,
    pub max_turn_duration_secs: u64,
    pub min_final_confidence: f64,
    pub allowed_tools: Option<Vec<String>>,
    pub allowed_tool_classes: Option<Vec<String>>,
    pub max_autonomous_tasks_per_hour: u32,
    pub max_autonomous_tasks_per_day: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_loop_steps: 12,
            max_tool_calls_per_turn: 20,
            max_input_chars: 32_000,
            max_turn_duration_secs: 120,
            min_final_confidence: 0.0,
            allowed_tools: None,
            allowed_tool_classes: None,
            max_autonomous_tasks_per_hour: 10,
            max_autonomous_tasks_per_day: 50,
        }
    }
}

impl Policy {
    /// Merge `override_` on top of `base`: any non-zero/non-empty field in
    /// `override_` wins, everything else falls back to `base`.
    #[must_use]
    pub fn merge(base: &Self, override_: &Self) -> Self {
        Self {
            max_loop_steps: non_zero_or(override_.max_loop_steps, base.max_loop_steps),
            max_tool_calls_per_turn: non_zero_or(
                override_.max_tool_calls_per_turn,
                base.max_tool_calls_per_turn,
            ),
            max_input_chars: non_zero_or(override_.max_input_chars, base.max_input_chars),
            max_turn_duration_secs: non_zero_or(
                override_.max_turn_duration_secs,
                base.max_turn_duration_secs,
            ),
            min_final_confidence: if override_.min_final_confidence > 0.0 {
                override_.min_final_confidence
            } else {
                base.min_final_confidence
            },
            allowed_tools: override_
                .allowed_tools
                .clone()
                .or_else(|| base.allowed_tools.clone()),
            allowed_tool_classes: override_
                .allowed_tool_classes
                .clone()
                .or_else(|| base.allowed_tool_classes.clone()),
            max_autonomous_tasks_per_hour: non_zero_or(
                override_.max_autonomous_tasks_per_hour,
                base.max_autonomous_tasks_per_hour,
            ),
            max_autonomous_tasks_per_day: non_zero_or(
                override_.max_autonomous_tasks_per_day,
                base.max_autonomous_tasks_per_day,
            ),
        }
    }
}

fn non_zero_or<T: PartialEq + Default + Copy>(value: T, fallback: T) -> T {
    if value == T::default() { fallback } else { value }
}

/// Outcome of one tool call within a turn's work log. In-memory only: built
/// up during `Execute` and handed back by value in the result trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Selected,
    Succeeded,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub tool_args: Value,
    pub status: ToolCallStatus,
    pub tool_output: Option<String>,
    pub error: Option<String>,
}

/// One entry in the turn's decision trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub utc_time: i64,
    pub stage: String,
    pub message: String,
}

/// A pairing user, independent of which connector they talk through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub default_role: Role,
    pub created_at: i64,
}

/// One connector-specific identity bound to a [`User`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub user_id: String,
    pub connector: Connector,
    pub connector_user_id: String,
    pub created_at: i64,
}

/// A top-level workspace: a working directory plus the objectives/tasks
/// scoped to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub slug: String,
    pub root_path: String,
    pub created_at: i64,
}

/// A connector-specific conversation bound to a workspace: the unit the
/// agent loop and scheduler address tasks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub workspace_id: String,
    pub connector: Connector,
    pub external_id: String,
    pub is_admin: bool,
    pub created_at: i64,
}

/// A connector a chat identity or context can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connector {
    Telegram,
    Discord,
    Cli,
    Imap,
}

impl Connector {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Cli => "cli",
            Self::Imap => "imap",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            "cli" => Some(Self::Cli),
            "imap" => Some(Self::Imap),
            _ => None,
        }
    }
}

/// Role granted to a user once a pairing token is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Operator,
    Admin,
    Overlord,
}

impl Default for Role {
    fn default() -> Self {
        Self::Admin
    }
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overlord => "overlord",
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "overlord" => Some(Self::Overlord),
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            "member" => Some(Self::Member),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

/// A not-yet-consumed pairing request: the persisted half of a pairing
/// token, whose secret half only ever exists as a SHA-256 hash here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub id: String,
    pub token_hash: String,
    pub hint: String,
    pub connector: Connector,
    pub role: Role,
    pub workspace_id: String,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
    pub created_at: i64,
}

/// Dedup bookkeeping for an IMAP mailbox ingestion pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapIngestion {
    pub id: String,
    pub account_key: String,
    pub uid: Option<i64>,
    pub message_id: Option<String>,
    pub ingested_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_merge_prefers_override_non_zero_fields() {
        let base = Policy::default();
        let mut over = Policy::default();
        over.max_loop_steps = 0;
        over.max_tool_calls_per_turn = 99;
        let merged = Policy::merge(&base, &over);
        assert_eq!(merged.max_loop_steps, base.max_loop_steps);
        assert_eq!(merged.max_tool_calls_per_turn, 99);
    }

    #[test]
    fn objective_backoff_caps_at_thirty_minutes() {
        let mut obj = sample_objective();
        obj.consecutive_failures = 1;
        assert_eq!(obj.backoff_secs(), 60);
        obj.consecutive_failures = 10;
        assert_eq!(obj.backoff_secs(), 30 * 60);
    }

    #[test]
    fn objective_auto_pauses_at_five_consecutive_failures() {
        let mut obj = sample_objective();
        obj.consecutive_failures = 4;
        assert!(!obj.should_auto_pause());
        obj.consecutive_failures = 5;
        assert!(obj.should_auto_pause());
    }

    #[test]
    fn recent_errors_stays_bounded() {
        let mut obj = sample_objective();
        for i in 0..10 {
            obj.record_recent_error(format!("err {i}"));
        }
        assert_eq!(obj.recent_errors.len(), RECENT_ERRORS_CAP);
        assert_eq!(obj.recent_errors[0], "err 5");
    }

    fn sample_objective() -> Objective {
        Objective {
            id: "obj_1".into(),
            workspace_id: "ws_1".into(),
            context_id: "ctx_1".into(),
            title: "t".into(),
            prompt: "p".into(),
            trigger_type: TriggerType::Schedule,
            event_key: None,
            cron_expr: Some("*/5 * * * *".into()),
            timezone: "UTC".into(),
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
}
