//! Action executor plugins: the code that actually performs an approved
//! [`crate::domain::ActionApproval`] once a human (or policy) has signed
//! off on it.

mod agentic_web;
mod external_command;
mod sandboxed_command;
mod webhook;

pub use agentic_web::AgenticWebPlugin;
pub use external_command::ExternalCommandPlugin;
pub use sandboxed_command::SandboxedCommandPlugin;
pub use webhook::WebhookPlugin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ActionApproval;
use crate::error::{Error, Result};

/// What an executor plugin needs from the runtime to do its work: where
/// workspace files live, how long a remote call may run, and (for the
/// sandboxed-command plugin) the shared truncating output buffer size.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    pub workspace_root: std::path::PathBuf,
    pub default_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub allowed_commands: Vec<String>,
}

/// Result of successfully executing an approved action.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub plugin: String,
    pub message: String,
}

/// One pluggable way of carrying out an [`ActionApproval`].
#[async_trait]
pub trait ExecutorPlugin: Send + Sync {
    /// Stable key identifying this plugin in logs and in
    /// `ActionApproval::executor_plugin`.
    fn plugin_key(&self) -> &'static str;

    /// Lowercased, whitespace-trimmed `action_type` values this plugin
    /// handles.
    fn action_types(&self) -> &'static [&'static str];

    /// Carry out `approval`. Errors bubble to the caller, who records them
    /// on the approval row.
    async fn execute(
        &self,
        ctx: &ExecutorContext,
        approval: &ActionApproval,
    ) -> Result<ExecutionOutcome>;
}

fn normalize_action_type(action_type: &str) -> String {
    action_type.trim().to_lowercase()
}

/// Registry of executor plugins keyed by normalized `action_type`. The
/// first plugin registered for a given action type wins; later
/// registrations for the same type are ignored.
#[derive(Default)]
pub struct ExecutorRegistry {
    plugins: HashMap<String, Arc<dyn ExecutorPlugin>>,
}

impl ExecutorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin` for every action type it declares. First wins.
    pub fn register(&mut self, plugin: Arc<dyn ExecutorPlugin>) {
        for action_type in plugin.action_types() {
            self.plugins
                .entry(normalize_action_type(action_type))
                .or_insert_with(|| Arc::clone(&plugin));
        }
    }

    /// The default registry: webhook, external-command, sandboxed-command,
    /// and agentic-web plugins, wired with `ctx`'s limits.
    #[must_use]
    pub fn with_builtin_plugins(
        http_client: reqwest::Client,
        agentic_web_base_url: Option<String>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WebhookPlugin::new(http_client.clone())));
        registry.register(Arc::new(ExternalCommandPlugin::new()));
        registry.register(Arc::new(SandboxedCommandPlugin::new()));
        if let Some(base_url) = agentic_web_base_url {
            registry.register(Arc::new(AgenticWebPlugin::new(http_client, base_url)));
        }
        registry
    }

    /// Execute `approval` via whichever plugin owns its `action_type`.
    pub async fn execute(
        &self,
        ctx: &ExecutorContext,
        approval: &ActionApproval,
    ) -> Result<ExecutionOutcome> {
        let key = normalize_action_type(&approval.action_type);
        let plugin = self
            .plugins
            .get(&key)
            .ok_or_else(|| Error::plugin_not_found(key.clone()))?;
        let mut outcome = plugin.execute(ctx, approval).await?;
        if outcome.plugin.is_empty() {
            outcome.plugin = plugin.plugin_key().to_owned();
        }
        Ok(outcome)
    }
}

/// Truncate `buf` to `max_bytes` at a UTF-8 boundary, appending a marker
/// noting how much was dropped.
pub(crate) fn truncate_captured(buf: &str, max_bytes: usize) -> String {
    if buf.len() <= max_bytes {
        return buf.to_owned();
    }
    let boundary = buf
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0);
    format!("{}\n...[truncated, {} bytes total]", &buf[..boundary], buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    struct First;
    struct Second;

    #[async_trait]
    impl ExecutorPlugin for First {
        fn plugin_key(&self) -> &'static str {
            "first"
        }
        fn action_types(&self) -> &'static [&'static str] {
            &["shared_type"]
        }
        async fn execute(
            &self,
            _ctx: &ExecutorContext,
            _approval: &ActionApproval,
        ) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome {
                plugin: String::new(),
                message: "from first".to_owned(),
            })
        }
    }

    #[async_trait]
    impl ExecutorPlugin for Second {
        fn plugin_key(&self) -> &'static str {
            "second"
        }
        fn action_types(&self) -> &'static [&'static str] {
            &["shared_type"]
        }
        async fn execute(
            &self,
            _ctx: &ExecutorContext,
            _approval: &ActionApproval,
        ) -> Result<ExecutionOutcome> {
            Ok(ExecutionOutcome {
                plugin: String::new(),
                message: "from second".to_owned(),
            })
        }
    }

    fn sample_approval(action_type: &str) -> ActionApproval {
        ActionApproval {
            id: "appr_1".to_owned(),
            workspace_id: "ws_1".to_owned(),
            context_id: "ctx_1".to_owned(),
            connector: "cli".to_owned(),
            external_id: "local".to_owned(),
            requester_user_id: "user_1".to_owned(),
            action_type: action_type.to_owned(),
            action_target: None,
            action_summary: None,
            payload: Map::new(),
            status: crate::domain::ApprovalStatus::Approved,
            approver_user_id: None,
            denied_reason: None,
            execution_status: crate::domain::ExecutionStatus::NotExecuted,
            execution_message: None,
            executor_plugin: None,
            executed_at: None,
        }
    }

    #[tokio::test]
    async fn first_registration_wins_for_shared_action_type() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(First));
        registry.register(Arc::new(Second));

        let ctx = ExecutorContext {
            workspace_root: std::env::temp_dir(),
            default_timeout_secs: 30,
            max_output_bytes: 1024,
            allowed_commands: vec![],
        };
        let outcome = registry
            .execute(&ctx, &sample_approval("Shared_Type"))
            .await
            .unwrap();
        assert_eq!(outcome.message, "from first");
        assert_eq!(outcome.plugin, "first");
    }

    #[tokio::test]
    async fn unknown_action_type_errors() {
        let registry = ExecutorRegistry::new();
        let ctx = ExecutorContext {
            workspace_root: std::env::temp_dir(),
            default_timeout_secs: 30,
            max_output_bytes: 1024,
            allowed_commands: vec![],
        };
        let err = registry.execute(&ctx, &sample_approval("mystery")).await;
        let err = err.expect_err("unknown action type must error");
        assert_eq!(err.kind(), crate::error::ErrorKind::PluginNotFound);
    }
}
