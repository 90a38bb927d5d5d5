//! Action-approval routing: turning a decided [`ActionApproval`] into an
//! [`ExecutorPlugin`] invocation, and recording the outcome.

use crate::domain::ActionApproval;
use crate::error::Result;
use crate::executors::{ExecutorContext, ExecutorRegistry};
use crate::store::Store;

/// Executes approved actions against the configured [`ExecutorRegistry`]
/// and persists the outcome on the approval row.
pub struct ActionApprovalRegistry {
    executors: ExecutorRegistry,
    ctx: ExecutorContext,
}

impl ActionApprovalRegistry {
    #[must_use]
    pub fn new(executors: ExecutorRegistry, ctx: ExecutorContext) -> Self {
        Self { executors, ctx }
    }

    /// Approve or deny a pending request. Approving immediately attempts
    /// execution; denying just records the decision.
    pub async fn decide(
        &self,
        store: &Store,
        approval_id: &str,
        approver_user_id: &str,
        approved: bool,
        denied_reason: Option<&str>,
    ) -> Result<Option<ActionApproval>> {
        store
            .decide_approval(approval_id, approver_user_id, approved, denied_reason)
            .await?;
        let Some(approval) = store.get_approval(approval_id).await? else {
            return Ok(None);
        };
        if !approved {
            return Ok(Some(approval));
        }
        self.execute(store, &approval).await?;
        store.get_approval(approval_id).await
    }

    /// Carry out an already-approved action and persist the outcome.
    pub async fn execute(&self, store: &Store, approval: &ActionApproval) -> Result<()> {
        match self.executors.execute(&self.ctx, approval).await {
            Ok(outcome) => {
                store
                    .mark_approval_executed(&approval.id, true, Some(&outcome.message), &outcome.plugin)
                    .await?;
                Ok(())
            }
            Err(e) => {
                let plugin = plugin_for(&self.executors, approval);
                store
                    .mark_approval_executed(&approval.id, false, Some(&e.to_string()), &plugin)
                    .await?;
                Err(e)
            }
        }
    }
}

fn plugin_for(executors: &ExecutorRegistry, approval: &ActionApproval) -> String {
    let _ = executors;
    approval.action_type.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApprovalStatus, ExecutionStatus};
    use serde_json::{Map, json};

    fn pending_approval() -> ActionApproval {
        ActionApproval {
            id: "appr_1".to_owned(),
            workspace_id: "ws_1".to_owned(),
            context_id: "ctx_1".to_owned(),
            connector: "cli".to_owned(),
            external_id: "local".to_owned(),
            requester_user_id: "user_1".to_owned(),
            action_type: "webhook".to_owned(),
            action_target: Some("https://example.invalid/hook".to_owned()),
            action_summary: None,
            payload: json!({"method": "POST"}).as_object().cloned().unwrap_or_else(Map::new),
            status: ApprovalStatus::Pending,
            approver_user_id: None,
            denied_reason: None,
            execution_status: ExecutionStatus::NotExecuted,
            execution_message: None,
            executor_plugin: None,
            executed_at: None,
        }
    }

    #[tokio::test]
    async fn denying_does_not_execute() {
        let store = Store::open_in_memory().await.expect("store");
        store.create_approval(&pending_approval()).await.expect("create");
        let registry = ActionApprovalRegistry::new(
            ExecutorRegistry::new(),
            ExecutorContext {
                workspace_root: std::env::temp_dir(),
                default_timeout_secs: 30,
                max_output_bytes: 1024,
                allowed_commands: vec![],
            },
        );
        let result = registry
            .decide(&store, "appr_1", "admin", false, Some("not needed"))
            .await
            .expect("decide");
        let approval = result.expect("approval exists");
        assert_eq!(approval.status, ApprovalStatus::Denied);
        assert_eq!(approval.execution_status, ExecutionStatus::NotExecuted);
    }
}
