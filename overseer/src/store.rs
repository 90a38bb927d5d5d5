//! SQLite-backed persistence for every domain entity in [`crate::domain`].
//!
//! A single connection lives behind an `Arc<Mutex<Connection>>` (the store
//! is deliberately single-writer: `max_open_conns = 1`) and all blocking
//! I/O is bridged onto the tokio blocking pool, following the same pattern
//! session storage elsewhere in this codebase uses for `rusqlite`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

use crate::domain::{
    ActionApproval, ApprovalStatus, Connector, Context, ExecutionStatus, Identity,
    ImapIngestion, Objective, PairingRequest, Policy, Role, Task, TaskRouting, TaskSource,
    TaskStatus, TriggerType, User, Workspace,
};
use crate::error::{Error, Result};
use crate::util;

/// Handle to the SQLite-backed store. Cheaply cloneable; clones share the
/// same connection and mutex.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    default_role TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    connector TEXT NOT NULL,
    connector_user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(connector, connector_user_id)
);

CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    root_path TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contexts (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    connector TEXT NOT NULL,
    external_id TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE(workspace_id, connector, external_id)
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    context_id TEXT NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    prompt TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    worker_id TEXT,
    started_at INTEGER,
    finished_at INTEGER,
    result_summary TEXT,
    result_path TEXT,
    error_message TEXT,
    run_key TEXT UNIQUE,
    routing TEXT NOT NULL,
    source TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_context ON tasks(context_id);

CREATE TABLE IF NOT EXISTS objectives (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    context_id TEXT NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    prompt TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    event_key TEXT,
    cron_expr TEXT,
    timezone TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    next_run_at INTEGER,
    last_run_at INTEGER,
    last_error TEXT,
    run_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    consecutive_successes INTEGER NOT NULL DEFAULT 0,
    total_run_duration_ms INTEGER NOT NULL DEFAULT 0,
    last_success_at INTEGER,
    last_failure_at INTEGER,
    auto_paused_reason TEXT,
    recent_errors TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_objectives_active_schedule
    ON objectives(active, trigger_type, next_run_at);
CREATE INDEX IF NOT EXISTS idx_objectives_event_key ON objectives(event_key);

CREATE TABLE IF NOT EXISTS action_approvals (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    context_id TEXT NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    connector TEXT NOT NULL,
    external_id TEXT NOT NULL,
    requester_user_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    action_target TEXT,
    action_summary TEXT,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    approver_user_id TEXT,
    denied_reason TEXT,
    execution_status TEXT NOT NULL,
    execution_message TEXT,
    executor_plugin TEXT,
    executed_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_approvals_status ON action_approvals(status);

CREATE TABLE IF NOT EXISTS agent_audit_events (
    id TEXT PRIMARY KEY,
    workspace_id TEXT,
    context_id TEXT,
    connector TEXT,
    external_id TEXT,
    event_type TEXT NOT NULL,
    blocked INTEGER NOT NULL DEFAULT 0,
    detail TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_context ON agent_audit_events(context_id, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_type ON agent_audit_events(event_type, created_at);

CREATE TABLE IF NOT EXISTS pairing_requests (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL UNIQUE,
    hint TEXT NOT NULL,
    connector TEXT NOT NULL,
    role TEXT NOT NULL,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL,
    consumed_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS imap_ingestions (
    id TEXT PRIMARY KEY,
    account_key TEXT NOT NULL,
    uid INTEGER,
    message_id TEXT,
    ingested_at INTEGER NOT NULL,
    UNIQUE(account_key, uid),
    UNIQUE(account_key, message_id)
);
";

impl Store {
    /// Open (creating if missing) the database at `path`, applying pragmas
    /// and the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = path.to_owned();
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;\
                 PRAGMA foreign_keys = ON;\
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an ephemeral in-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> rusqlite::Result<Connection> {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Bridge a blocking closure over the locked connection onto the tokio
    /// blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&guard)
        })
        .await?
        .map_err(Error::from)
    }

    // ---- users / identities -------------------------------------------

    /// Create a user with a fresh id.
    pub async fn create_user(&self, display_name: &str, default_role: Role) -> Result<User> {
        let user = User {
            id: util::generate_id("user"),
            display_name: display_name.to_owned(),
            default_role,
            created_at: util::timestamp_secs(),
        };
        let u = user.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, default_role, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![u.id, u.display_name, u.default_role.as_str(), u.created_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(user)
    }

    /// Look up a user by id.
    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, display_name, default_role, created_at FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()
        })
        .await
    }

    /// Bind a connector identity to `user_id`, creating it if not already
    /// bound.
    pub async fn upsert_identity(
        &self,
        user_id: &str,
        connector: Connector,
        connector_user_id: &str,
    ) -> Result<Identity> {
        if let Some(existing) = self
            .get_identity_by_connector(connector, connector_user_id)
            .await?
        {
            return Ok(existing);
        }
        let identity = Identity {
            id: util::generate_id("ident"),
            user_id: user_id.to_owned(),
            connector,
            connector_user_id: connector_user_id.to_owned(),
            created_at: util::timestamp_secs(),
        };
        let i = identity.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO identities (id, user_id, connector, connector_user_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    i.id,
                    i.user_id,
                    i.connector.as_str(),
                    i.connector_user_id,
                    i.created_at
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(identity)
    }

    /// Look up an identity by `(connector, connector_user_id)`.
    pub async fn get_identity_by_connector(
        &self,
        connector: Connector,
        connector_user_id: &str,
    ) -> Result<Option<Identity>> {
        let connector_user_id = connector_user_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, user_id, connector, connector_user_id, created_at \
                 FROM identities WHERE connector = ?1 AND connector_user_id = ?2",
                params![connector.as_str(), connector_user_id],
                row_to_identity,
            )
            .optional()
        })
        .await
    }

    // ---- workspaces / contexts -----------------------------------------

    /// Create a workspace with the given slug and root path.
    pub async fn create_workspace(&self, slug: &str, root_path: &str) -> Result<Workspace> {
        let workspace = Workspace {
            id: util::generate_id("ws"),
            slug: slug.to_owned(),
            root_path: root_path.to_owned(),
            created_at: util::timestamp_secs(),
        };
        let w = workspace.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO workspaces (id, slug, root_path, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![w.id, w.slug, w.root_path, w.created_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(workspace)
    }

    /// Look up a workspace by slug.
    pub async fn get_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        let slug = slug.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, slug, root_path, created_at FROM workspaces WHERE slug = ?1",
                params![slug],
                row_to_workspace,
            )
            .optional()
        })
        .await
    }

    /// List all workspaces, most recently created first.
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, slug, root_path, created_at FROM workspaces ORDER BY created_at DESC",
            )?;
            stmt.query_map([], row_to_workspace)?.collect()
        })
        .await
    }

    /// Fetch the context for `(workspace_id, connector, external_id)`,
    /// creating it (as non-admin) if it does not exist yet.
    pub async fn get_or_create_context(
        &self,
        workspace_id: &str,
        connector: Connector,
        external_id: &str,
    ) -> Result<Context> {
        let existing = self
            .get_context(workspace_id, connector, external_id)
            .await?;
        if let Some(ctx) = existing {
            return Ok(ctx);
        }
        let context = Context {
            id: util::generate_id("ctx"),
            workspace_id: workspace_id.to_owned(),
            connector,
            external_id: external_id.to_owned(),
            is_admin: false,
            created_at: util::timestamp_secs(),
        };
        let c = context.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO contexts (id, workspace_id, connector, external_id, is_admin, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    c.id,
                    c.workspace_id,
                    c.connector.as_str(),
                    c.external_id,
                    i64::from(c.is_admin),
                    c.created_at
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(context)
    }

    /// Look up a context without creating it.
    pub async fn get_context(
        &self,
        workspace_id: &str,
        connector: Connector,
        external_id: &str,
    ) -> Result<Option<Context>> {
        let workspace_id = workspace_id.to_owned();
        let external_id = external_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, workspace_id, connector, external_id, is_admin, created_at \
                 FROM contexts WHERE workspace_id = ?1 AND connector = ?2 AND external_id = ?3",
                params![workspace_id, connector.as_str(), external_id],
                row_to_context,
            )
            .optional()
        })
        .await
    }

    // ---- tasks -----------------------------------------------------------

    /// Insert a new queued task. Fails with
    /// [`crate::error::ErrorKind::IdempotencyConflict`] if `run_key` is set
    /// and already exists.
    pub async fn create_task(&self, task: &Task) -> Result<()> {
        let t = task.clone();
        let routing = serde_json::to_string(&t.routing)?;
        let source = serde_json::to_string(&t.source)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, workspace_id, context_id, kind, title, prompt, status, \
                 attempts, worker_id, started_at, finished_at, result_summary, result_path, \
                 error_message, run_key, routing, source, created_at, updated_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
                params![
                    t.id,
                    t.workspace_id,
                    t.context_id,
                    t.kind,
                    t.title,
                    t.prompt,
                    t.status.as_str(),
                    t.attempts,
                    t.worker_id,
                    t.started_at,
                    t.finished_at,
                    t.result_summary,
                    t.result_path,
                    t.error_message,
                    t.run_key,
                    routing,
                    source,
                    t.created_at,
                    t.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Atomically claim the oldest queued task and mark it running under
    /// `worker_id`.
    pub async fn claim_next_task(&self, worker_id: &str) -> Result<Option<Task>> {
        let worker_id = worker_id.to_owned();
        self.blocking(move |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM tasks WHERE status = 'queued' ORDER BY created_at ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else { return Ok(None) };
            let now = chrono::Utc::now().timestamp();
            let updated = conn.execute(
                "UPDATE tasks SET status = 'running', worker_id = ?1, started_at = ?2, \
                 attempts = attempts + 1, updated_at = ?2 \
                 WHERE id = ?3 AND status = 'queued'",
                params![worker_id, now, id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            conn.query_row(
                "SELECT id, workspace_id, context_id, kind, title, prompt, status, attempts, \
                 worker_id, started_at, finished_at, result_summary, result_path, error_message, \
                 run_key, routing, source, created_at, updated_at FROM tasks WHERE id = ?1",
                params![id],
                row_to_task,
            )
            .optional()
        })
        .await
    }

    /// Mark `task_id` succeeded, conditioned on it still being held by
    /// `worker_id`.
    pub async fn complete_task(
        &self,
        task_id: &str,
        worker_id: &str,
        summary: Option<&str>,
        result_path: Option<&str>,
    ) -> Result<()> {
        let task_id = task_id.to_owned();
        let worker_id = worker_id.to_owned();
        let summary = summary.map(str::to_owned);
        let result_path = result_path.map(str::to_owned);
        self.blocking(move |conn| {
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                "UPDATE tasks SET status = 'succeeded', finished_at = ?1, result_summary = ?2, \
                 result_path = ?3, updated_at = ?1 \
                 WHERE id = ?4 AND status = 'running' AND worker_id = ?5",
                params![now, summary, result_path, task_id, worker_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark `task_id` failed, conditioned on it still being held by
    /// `worker_id`.
    pub async fn fail_task(&self, task_id: &str, worker_id: &str, error: &str) -> Result<()> {
        let task_id = task_id.to_owned();
        let worker_id = worker_id.to_owned();
        let error = error.to_owned();
        self.blocking(move |conn| {
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                "UPDATE tasks SET status = 'failed', finished_at = ?1, error_message = ?2, \
                 updated_at = ?1 \
                 WHERE id = ?3 AND status = 'running' AND worker_id = ?4",
                params![now, error, task_id, worker_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Look up a task by id.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, workspace_id, context_id, kind, title, prompt, status, attempts, \
                 worker_id, started_at, finished_at, result_summary, result_path, error_message, \
                 run_key, routing, source, created_at, updated_at FROM tasks WHERE id = ?1",
                params![id],
                row_to_task,
            )
            .optional()
        })
        .await
    }

    /// List tasks for a context, newest first.
    pub async fn list_tasks_for_context(&self, context_id: &str) -> Result<Vec<Task>> {
        let context_id = context_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workspace_id, context_id, kind, title, prompt, status, attempts, \
                 worker_id, started_at, finished_at, result_summary, result_path, error_message, \
                 run_key, routing, source, created_at, updated_at FROM tasks \
                 WHERE context_id = ?1 ORDER BY created_at DESC",
            )?;
            stmt.query_map(params![context_id], row_to_task)?.collect()
        })
        .await
    }

    // ---- objectives --------------------------------------------------

    /// Insert a new objective.
    pub async fn create_objective(&self, objective: &Objective) -> Result<()> {
        let o = objective.clone();
        self.blocking(move |conn| insert_objective(conn, &o)).await
    }

    /// Look up an objective by id.
    pub async fn get_objective(&self, id: &str) -> Result<Option<Objective>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(OBJECTIVE_SELECT, params![id], row_to_objective)
                .optional()
        })
        .await
    }

    /// Active scheduled objectives due at or before `now`, oldest-due
    /// first, capped at `limit`.
    pub async fn list_due_scheduled_objectives(
        &self,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Objective>> {
        self.blocking(move |conn| {
            let sql = format!(
                "{OBJECTIVE_SELECT_BASE} WHERE active = 1 AND trigger_type = 'schedule' \
                 AND next_run_at IS NOT NULL AND next_run_at <= ?1 \
                 ORDER BY next_run_at ASC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![now, limit as i64], row_to_objective)?
                .collect()
        })
        .await
    }

    /// Active event objectives registered for `event_key`.
    pub async fn list_objectives_for_event(&self, event_key: &str) -> Result<Vec<Objective>> {
        let event_key = event_key.to_owned();
        self.blocking(move |conn| {
            let sql = format!(
                "{OBJECTIVE_SELECT_BASE} WHERE active = 1 AND trigger_type = 'event' \
                 AND event_key = ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![event_key], row_to_objective)?.collect()
        })
        .await
    }

    /// List every objective in a workspace.
    pub async fn list_objectives(&self, workspace_id: &str) -> Result<Vec<Objective>> {
        let workspace_id = workspace_id.to_owned();
        self.blocking(move |conn| {
            let sql = format!("{OBJECTIVE_SELECT_BASE} WHERE workspace_id = ?1 ORDER BY title ASC");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![workspace_id], row_to_objective)?
                .collect()
        })
        .await
    }

    /// Persist the full post-run bookkeeping state of an objective (run
    /// counters, backoff, next run, recent errors).
    pub async fn save_objective(&self, objective: &Objective) -> Result<()> {
        let o = objective.clone();
        self.blocking(move |conn| {
            let recent_errors = serde_json::to_string(&o.recent_errors)
                .unwrap_or_else(|_| "[]".to_owned());
            conn.execute(
                "UPDATE objectives SET active = ?1, next_run_at = ?2, last_run_at = ?3, \
                 last_error = ?4, run_count = ?5, success_count = ?6, failure_count = ?7, \
                 consecutive_failures = ?8, consecutive_successes = ?9, \
                 total_run_duration_ms = ?10, last_success_at = ?11, last_failure_at = ?12, \
                 auto_paused_reason = ?13, recent_errors = ?14 WHERE id = ?15",
                params![
                    i64::from(o.active),
                    o.next_run_at,
                    o.last_run_at,
                    o.last_error,
                    o.run_count,
                    o.success_count,
                    o.failure_count,
                    o.consecutive_failures,
                    o.consecutive_successes,
                    o.total_run_duration_ms,
                    o.last_success_at,
                    o.last_failure_at,
                    o.auto_paused_reason,
                    recent_errors,
                    o.id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Set `active` on an objective directly (pause/resume CLI path).
    pub async fn set_objective_active(&self, id: &str, active: bool) -> Result<()> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE objectives SET active = ?1, auto_paused_reason = NULL WHERE id = ?2",
                params![i64::from(active), id],
            )?;
            Ok(())
        })
        .await
    }

    // ---- action approvals ----------------------------------------------

    /// Insert a new pending approval.
    pub async fn create_approval(&self, approval: &ActionApproval) -> Result<()> {
        let a = approval.clone();
        self.blocking(move |conn| {
            let payload = Value::Object(a.payload.clone()).to_string();
            conn.execute(
                "INSERT INTO action_approvals (id, workspace_id, context_id, connector, \
                 external_id, requester_user_id, action_type, action_target, action_summary, \
                 payload, status, approver_user_id, denied_reason, execution_status, \
                 execution_message, executor_plugin, executed_at, created_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                params![
                    a.id,
                    a.workspace_id,
                    a.context_id,
                    a.connector,
                    a.external_id,
                    a.requester_user_id,
                    a.action_type,
                    a.action_target,
                    a.action_summary,
                    payload,
                    approval_status_str(a.status),
                    a.approver_user_id,
                    a.denied_reason,
                    execution_status_str(a.execution_status),
                    a.execution_message,
                    a.executor_plugin,
                    a.executed_at,
                    util::timestamp_secs(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Look up a pending/decided approval.
    pub async fn get_approval(&self, id: &str) -> Result<Option<ActionApproval>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(APPROVAL_SELECT, params![id], row_to_approval)
                .optional()
        })
        .await
    }

    /// Record an approve/deny decision.
    pub async fn decide_approval(
        &self,
        id: &str,
        approver_user_id: &str,
        approved: bool,
        denied_reason: Option<&str>,
    ) -> Result<()> {
        let id = id.to_owned();
        let approver_user_id = approver_user_id.to_owned();
        let denied_reason = denied_reason.map(str::to_owned);
        self.blocking(move |conn| {
            let status = if approved { "approved" } else { "denied" };
            conn.execute(
                "UPDATE action_approvals SET status = ?1, approver_user_id = ?2, \
                 denied_reason = ?3 WHERE id = ?4 AND status = 'pending'",
                params![status, approver_user_id, denied_reason, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Record the outcome of executing an approved action.
    pub async fn mark_approval_executed(
        &self,
        id: &str,
        succeeded: bool,
        message: Option<&str>,
        plugin: &str,
    ) -> Result<()> {
        let id = id.to_owned();
        let message = message.map(str::to_owned);
        let plugin = plugin.to_owned();
        self.blocking(move |conn| {
            let status = if succeeded { "succeeded" } else { "failed" };
            conn.execute(
                "UPDATE action_approvals SET execution_status = ?1, execution_message = ?2, \
                 executor_plugin = ?3, executed_at = ?4 WHERE id = ?5",
                params![status, message, plugin, util::timestamp_secs(), id],
            )?;
            Ok(())
        })
        .await
    }

    // ---- audit -----------------------------------------------------------

    /// Append an audit event. Audit events are never updated or deleted.
    #[allow(clippy::too_many_arguments)]
    pub async fn append_audit_event(
        &self,
        workspace_id: Option<&str>,
        context_id: Option<&str>,
        connector: Option<&str>,
        external_id: Option<&str>,
        event_type: &str,
        blocked: bool,
        detail: &Value,
    ) -> Result<()> {
        let id = util::generate_id("audit");
        let workspace_id = workspace_id.map(str::to_owned);
        let context_id = context_id.map(str::to_owned);
        let connector = connector.map(str::to_owned);
        let external_id = external_id.map(str::to_owned);
        let event_type = event_type.to_owned();
        let detail = detail.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO agent_audit_events (id, workspace_id, context_id, connector, \
                 external_id, event_type, blocked, detail, created_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    id,
                    workspace_id,
                    context_id,
                    connector,
                    external_id,
                    event_type,
                    i64::from(blocked),
                    detail,
                    util::timestamp_secs(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// List audit events for a context, newest first, optionally restricted
    /// to blocked-only entries.
    pub async fn list_audit_events(
        &self,
        context_id: &str,
        blocked_only: bool,
        limit: usize,
    ) -> Result<Vec<AuditEventRow>> {
        let context_id = context_id.to_owned();
        self.blocking(move |conn| {
            let sql = if blocked_only {
                "SELECT id, workspace_id, context_id, connector, external_id, event_type, \
                 blocked, detail, created_at FROM agent_audit_events \
                 WHERE context_id = ?1 AND blocked = 1 ORDER BY created_at DESC LIMIT ?2"
            } else {
                "SELECT id, workspace_id, context_id, connector, external_id, event_type, \
                 blocked, detail, created_at FROM agent_audit_events \
                 WHERE context_id = ?1 ORDER BY created_at DESC LIMIT ?2"
            };
            let mut stmt = conn.prepare(sql)?;
            stmt.query_map(params![context_id, limit as i64], row_to_audit_event)?
                .collect()
        })
        .await
    }

    // ---- pairing ---------------------------------------------------------

    /// Insert a pairing request.
    pub async fn create_pairing_request(&self, request: &PairingRequest) -> Result<()> {
        let r = request.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO pairing_requests (id, token_hash, hint, connector, role, \
                 workspace_id, expires_at, consumed_at, created_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    r.id,
                    r.token_hash,
                    r.hint,
                    r.connector.as_str(),
                    r.role.as_str(),
                    r.workspace_id,
                    r.expires_at,
                    r.consumed_at,
                    r.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Look up a pairing request by the SHA-256 hash of its token.
    pub async fn get_pairing_request_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PairingRequest>> {
        let token_hash = token_hash.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, token_hash, hint, connector, role, workspace_id, expires_at, \
                 consumed_at, created_at FROM pairing_requests WHERE token_hash = ?1",
                params![token_hash],
                row_to_pairing_request,
            )
            .optional()
        })
        .await
    }

    /// List outstanding (not yet consumed) pairing requests.
    pub async fn list_pending_pairing_requests(&self) -> Result<Vec<PairingRequest>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, token_hash, hint, connector, role, workspace_id, expires_at, \
                 consumed_at, created_at FROM pairing_requests \
                 WHERE consumed_at IS NULL ORDER BY created_at DESC",
            )?;
            stmt.query_map([], row_to_pairing_request)?.collect()
        })
        .await
    }

    /// Mark a pairing request consumed.
    pub async fn consume_pairing_request(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE pairing_requests SET consumed_at = ?1 WHERE id = ?2 AND consumed_at IS NULL",
                params![util::timestamp_secs(), id],
            )?;
            Ok(())
        })
        .await
    }

    /// Revoke (delete) a not-yet-consumed pairing request.
    pub async fn revoke_pairing_request(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM pairing_requests WHERE id = ?1 AND consumed_at IS NULL",
                params![id],
            )?;
            Ok(())
        })
        .await
    }

    // ---- imap ingestion dedup -------------------------------------------

    /// Whether a message has already been ingested for `account_key`,
    /// identified by UID or message-id (whichever is available).
    pub async fn was_imap_ingested(
        &self,
        account_key: &str,
        uid: Option<i64>,
        message_id: Option<&str>,
    ) -> Result<bool> {
        let account_key = account_key.to_owned();
        let message_id = message_id.map(str::to_owned);
        self.blocking(move |conn| {
            if let Some(uid) = uid {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM imap_ingestions WHERE account_key = ?1 AND uid = ?2",
                        params![account_key, uid],
                        |row| row.get(0),
                    )
                    .optional()?;
                if found.is_some() {
                    return Ok(true);
                }
            }
            if let Some(message_id) = message_id {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM imap_ingestions WHERE account_key = ?1 AND message_id = ?2",
                        params![account_key, message_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Ok(found.is_some());
            }
            Ok(false)
        })
        .await
    }

    /// Record an ingested message for dedup purposes.
    pub async fn record_imap_ingestion(&self, ingestion: &ImapIngestion) -> Result<()> {
        let i = ingestion.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO imap_ingestions (id, account_key, uid, message_id, ingested_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![i.id, i.account_key, i.uid, i.message_id, i.ingested_at],
            )?;
            Ok(())
        })
        .await
    }
}

/// A row from `agent_audit_events`, returned as-is rather than mapped into
/// a richer [`crate::domain`] type (audit events are read-mostly and
/// consumed directly by CLI/report code).
#[derive(Debug, Clone)]
pub struct AuditEventRow {
    pub id: String,
    pub workspace_id: Option<String>,
    pub context_id: Option<String>,
    pub connector: Option<String>,
    pub external_id: Option<String>,
    pub event_type: String,
    pub blocked: bool,
    pub detail: Value,
    pub created_at: i64,
}

const OBJECTIVE_SELECT_BASE: &str = "SELECT id, workspace_id, context_id, title, prompt, \
     trigger_type, event_key, cron_expr, timezone, active, next_run_at, last_run_at, \
     last_error, run_count, success_count, failure_count, consecutive_failures, \
     consecutive_successes, total_run_duration_ms, last_success_at, last_failure_at, \
     auto_paused_reason, recent_errors FROM objectives";

const OBJECTIVE_SELECT: &str = "SELECT id, workspace_id, context_id, title, prompt, \
     trigger_type, event_key, cron_expr, timezone, active, next_run_at, last_run_at, \
     last_error, run_count, success_count, failure_count, consecutive_failures, \
     consecutive_successes, total_run_duration_ms, last_success_at, last_failure_at, \
     auto_paused_reason, recent_errors FROM objectives WHERE id = ?1";

const APPROVAL_SELECT: &str = "SELECT id, workspace_id, context_id, connector, external_id, \
     requester_user_id, action_type, action_target, action_summary, payload, status, \
     approver_user_id, denied_reason, execution_status, execution_message, executor_plugin, \
     executed_at FROM action_approvals WHERE id = ?1";

fn insert_objective(conn: &Connection, o: &Objective) -> rusqlite::Result<()> {
    let recent_errors = serde_json::to_string(&o.recent_errors).unwrap_or_else(|_| "[]".to_owned());
    conn.execute(
        "INSERT INTO objectives (id, workspace_id, context_id, title, prompt, trigger_type, \
         event_key, cron_expr, timezone, active, next_run_at, last_run_at, last_error, \
         run_count, success_count, failure_count, consecutive_failures, consecutive_successes, \
         total_run_duration_ms, last_success_at, last_failure_at, auto_paused_reason, \
         recent_errors) \
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
        params![
            o.id,
            o.workspace_id,
            o.context_id,
            o.title,
            o.prompt,
            trigger_type_str(o.trigger_type),
            o.event_key,
            o.cron_expr,
            o.timezone,
            i64::from(o.active),
            o.next_run_at,
            o.last_run_at,
            o.last_error,
            o.run_count,
            o.success_count,
            o.failure_count,
            o.consecutive_failures,
            o.consecutive_successes,
            o.total_run_duration_ms,
            o.last_success_at,
            o.last_failure_at,
            o.auto_paused_reason,
            recent_errors,
        ],
    )?;
    Ok(())
}

fn trigger_type_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::Schedule => "schedule",
        TriggerType::Event => "event",
    }
}

fn approval_status_str(s: ApprovalStatus) -> &'static str {
    match s {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Denied => "denied",
    }
}

fn execution_status_str(s: ExecutionStatus) -> &'static str {
    match s {
        ExecutionStatus::NotExecuted => "not_executed",
        ExecutionStatus::Succeeded => "succeeded",
        ExecutionStatus::Failed => "failed",
    }
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        display_name: row.get(1)?,
        default_role: Role::parse(&role).unwrap_or_default(),
        created_at: row.get(3)?,
    })
}

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let connector: String = row.get(2)?;
    Ok(Identity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        connector: Connector::parse(&connector).unwrap_or(Connector::Cli),
        connector_user_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        slug: row.get(1)?,
        root_path: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_context(row: &Row<'_>) -> rusqlite::Result<Context> {
    let connector: String = row.get(2)?;
    let is_admin: i64 = row.get(4)?;
    Ok(Context {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        connector: Connector::parse(&connector).unwrap_or(Connector::Cli),
        external_id: row.get(3)?,
        is_admin: is_admin != 0,
        created_at: row.get(5)?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(6)?;
    let routing: String = row.get(15)?;
    let source: String = row.get(16)?;
    Ok(Task {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        context_id: row.get(2)?,
        kind: row.get(3)?,
        title: row.get(4)?,
        prompt: row.get(5)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        attempts: row.get(7)?,
        worker_id: row.get(8)?,
        started_at: row.get(9)?,
        finished_at: row.get(10)?,
        result_summary: row.get(11)?,
        result_path: row.get(12)?,
        error_message: row.get(13)?,
        run_key: row.get(14)?,
        routing: serde_json::from_str::<TaskRouting>(&routing).unwrap_or_default(),
        source: serde_json::from_str::<TaskSource>(&source).unwrap_or_default(),
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn row_to_objective(row: &Row<'_>) -> rusqlite::Result<Objective> {
    let trigger_type: String = row.get(5)?;
    let active: i64 = row.get(9)?;
    let recent_errors: String = row.get(21)?;
    Ok(Objective {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        context_id: row.get(2)?,
        title: row.get(3)?,
        prompt: row.get(4)?,
        trigger_type: if trigger_type == "event" {
            TriggerType::Event
        } else {
            TriggerType::Schedule
        },
        event_key: row.get(6)?,
        cron_expr: row.get(7)?,
        timezone: row.get(8)?,
        active: active != 0,
        next_run_at: row.get(10)?,
        last_run_at: row.get(11)?,
        last_error: row.get(12)?,
        run_count: row.get(13)?,
        success_count: row.get(14)?,
        failure_count: row.get(15)?,
        consecutive_failures: row.get(16)?,
        consecutive_successes: row.get(17)?,
        total_run_duration_ms: row.get(18)?,
        last_success_at: row.get(19)?,
        last_failure_at: row.get(20)?,
        auto_paused_reason: row.get(21).unwrap_or(None),
        recent_errors: serde_json::from_str(&recent_errors).unwrap_or_default(),
    })
}

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<ActionApproval> {
    let payload: String = row.get(9)?;
    let status: String = row.get(10)?;
    let execution_status: String = row.get(13)?;
    let payload_value: Value = serde_json::from_str(&payload).unwrap_or(Value::Null);
    let payload_map = match payload_value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(ActionApproval {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        context_id: row.get(2)?,
        connector: row.get(3)?,
        external_id: row.get(4)?,
        requester_user_id: row.get(5)?,
        action_type: row.get(6)?,
        action_target: row.get(7)?,
        action_summary: row.get(8)?,
        payload: payload_map,
        status: match status.as_str() {
            "approved" => ApprovalStatus::Approved,
            "denied" => ApprovalStatus::Denied,
            _ => ApprovalStatus::Pending,
        },
        approver_user_id: row.get(11)?,
        denied_reason: row.get(12)?,
        execution_status: match execution_status.as_str() {
            "succeeded" => ExecutionStatus::Succeeded,
            "failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::NotExecuted,
        },
        execution_message: row.get(14)?,
        executor_plugin: row.get(15)?,
        executed_at: row.get(16)?,
    })
}

fn row_to_pairing_request(row: &Row<'_>) -> rusqlite::Result<PairingRequest> {
    let connector: String = row.get(3)?;
    let role: String = row.get(4)?;
    Ok(PairingRequest {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        hint: row.get(2)?,
        connector: Connector::parse(&connector).unwrap_or(Connector::Cli),
        role: Role::parse(&role).unwrap_or_default(),
        workspace_id: row.get(5)?,
        expires_at: row.get(6)?,
        consumed_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_audit_event(row: &Row<'_>) -> rusqlite::Result<AuditEventRow> {
    let blocked: i64 = row.get(6)?;
    let detail: String = row.get(7)?;
    Ok(AuditEventRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        context_id: row.get(2)?,
        connector: row.get(3)?,
        external_id: row.get(4)?,
        event_type: row.get(5)?,
        blocked: blocked != 0,
        detail: serde_json::from_str(&detail).unwrap_or(Value::Null),
        created_at: row.get(8)?,
    })
}

/// `Policy::default()` merged with nothing; a convenience for callers that
/// only need the process-wide baseline (no per-context override yet).
#[must_use]
pub fn default_policy() -> Policy {
    Policy::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskRouting, TaskSource};

    async fn open_test_store() -> Store {
        Store::open_in_memory().await.expect("open store")
    }

    #[tokio::test]
    async fn workspace_and_context_round_trip() {
        let store = open_test_store().await;
        let ws = store.create_workspace("default", "/tmp/ws").await.unwrap();
        let ctx = store
            .get_or_create_context(&ws.id, Connector::Cli, "local")
            .await
            .unwrap();
        let again = store
            .get_or_create_context(&ws.id, Connector::Cli, "local")
            .await
            .unwrap();
        assert_eq!(ctx.id, again.id);
    }

    #[tokio::test]
    async fn task_lifecycle_claims_and_completes() {
        let store = open_test_store().await;
        let ws = store.create_workspace("default", "/tmp/ws").await.unwrap();
        let ctx = store
            .get_or_create_context(&ws.id, Connector::Cli, "local")
            .await
            .unwrap();
        let task = Task {
            id: util::generate_id("task"),
            workspace_id: ws.id.clone(),
            context_id: ctx.id.clone(),
            kind: "chat".to_owned(),
            title: "say hi".to_owned(),
            prompt: "say hi".to_owned(),
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: None,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            run_key: None,
            routing: TaskRouting::default(),
            source: TaskSource::default(),
            created_at: util::timestamp_secs(),
            updated_at: util::timestamp_secs(),
        };
        store.create_task(&task).await.unwrap();

        let claimed = store.claim_next_task("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::Running);

        store
            .complete_task(&claimed.id, "worker-1", Some("done"), None)
            .await
            .unwrap();
        let fetched = store.get_task(&claimed.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_run_key_is_rejected() {
        let store = open_test_store().await;
        let ws = store.create_workspace("default", "/tmp/ws").await.unwrap();
        let ctx = store
            .get_or_create_context(&ws.id, Connector::Cli, "local")
            .await
            .unwrap();
        let mut task = Task {
            id: util::generate_id("task"),
            workspace_id: ws.id.clone(),
            context_id: ctx.id.clone(),
            kind: "objective".to_owned(),
            title: "t".to_owned(),
            prompt: "p".to_owned(),
            status: TaskStatus::Queued,
            attempts: 0,
            worker_id: None,
            started_at: None,
            finished_at: None,
            result_summary: None,
            result_path: None,
            error_message: None,
            run_key: Some("obj_1|2026-01-01".to_owned()),
            routing: TaskRouting::default(),
            source: TaskSource::default(),
            created_at: util::timestamp_secs(),
            updated_at: util::timestamp_secs(),
        };
        store.create_task(&task).await.unwrap();
        task.id = util::generate_id("task");
        let err = store.create_task(&task).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IdempotencyConflict);
    }

    #[tokio::test]
    async fn pairing_request_round_trips_and_consumes() {
        let store = open_test_store().await;
        let ws = store.create_workspace("default", "/tmp/ws").await.unwrap();
        let request = PairingRequest {
            id: util::generate_id("pair"),
            token_hash: "deadbeef".to_owned(),
            hint: "ABCD...WXYZ".to_owned(),
            connector: Connector::Telegram,
            role: Role::Admin,
            workspace_id: ws.id.clone(),
            expires_at: util::timestamp_secs() + 900,
            consumed_at: None,
            created_at: util::timestamp_secs(),
        };
        store.create_pairing_request(&request).await.unwrap();
        let fetched = store
            .get_pairing_request_by_hash("deadbeef")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, request.id);
        store.consume_pairing_request(&request.id).await.unwrap();
        let fetched = store
            .get_pairing_request_by_hash("deadbeef")
            .await
            .unwrap()
            .unwrap();
        assert!(fetched.consumed_at.is_some());
    }

    #[tokio::test]
    async fn imap_ingestion_dedup_by_uid() {
        let store = open_test_store().await;
        assert!(!store.was_imap_ingested("acct", Some(42), None).await.unwrap());
        store
            .record_imap_ingestion(&ImapIngestion {
                id: util::generate_id("imap"),
                account_key: "acct".to_owned(),
                uid: Some(42),
                message_id: None,
                ingested_at: util::timestamp_secs(),
            })
            .await
            .unwrap();
        assert!(store.was_imap_ingested("acct", Some(42), None).await.unwrap());
    }
}
