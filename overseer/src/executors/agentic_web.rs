use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ExecutionOutcome, ExecutorContext, ExecutorPlugin};
use crate::domain::ActionApproval;
use crate::error::{Error, Result};

/// Dispatches to an external "agentic web" automation service over HTTP,
/// either synchronously (`/v1/automation/run`) or as a fire-and-forget job
/// (`/v1/automation/run-async`).
pub struct AgenticWebPlugin {
    client: reqwest::Client,
    base_url: String,
}

impl AgenticWebPlugin {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn is_async(&self, approval: &ActionApproval) -> bool {
        approval.action_type.trim().eq_ignore_ascii_case("agentic_web_async")
            || approval
                .payload
                .get("async")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

fn find_goal(approval: &ActionApproval) -> Option<String> {
    approval
        .payload
        .get("goal")
        .and_then(Value::as_str)
        .or_else(|| approval.payload.get("task").and_then(Value::as_str))
        .map(str::to_owned)
        .or_else(|| approval.action_summary.clone())
}

fn find_target_url(approval: &ActionApproval) -> Option<String> {
    approval
        .payload
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| {
            approval
                .payload
                .get("request")
                .and_then(|r| r.get("url"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .or_else(|| approval.action_target.clone())
}

/// Pull a summary string out of one of the several nested shapes a
/// response body might use.
fn extract_summary(body: &Value) -> Option<String> {
    for key in ["run_id", "result", "output", "message"] {
        if let Some(value) = body.get(key) {
            if let Some(text) = value.as_str() {
                if !text.is_empty() {
                    return Some(format!("{key}: {text}"));
                }
            } else if !value.is_null() {
                return Some(format!("{key}: {value}"));
            }
        }
    }
    None
}

fn extract_error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.get("detail").and_then(Value::as_str))
        .map(str::to_owned)
}

#[async_trait]
impl ExecutorPlugin for AgenticWebPlugin {
    fn plugin_key(&self) -> &'static str {
        "agentic_web"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["agentic_web", "agentic_web_async", "automation_run"]
    }

    async fn execute(
        &self,
        _ctx: &ExecutorContext,
        approval: &ActionApproval,
    ) -> Result<ExecutionOutcome> {
        let mut goal =
            find_goal(approval).ok_or_else(|| Error::internal("agentic-web action has no goal"))?;
        let target_url =
            find_target_url(approval).ok_or_else(|| Error::internal("agentic-web action has no url"))?;

        if !goal.contains(&target_url) {
            goal.push_str(&format!("\nTarget URL: {target_url}"));
        }

        let path = if self.is_async(approval) {
            "/v1/automation/run-async"
        } else {
            "/v1/automation/run"
        };
        let endpoint = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&endpoint)
            .json(&json!({"goal": goal, "url": target_url}))
            .send()
            .await
            .map_err(|e| Error::internal(format!("agentic-web request failed: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String(String::new()));

        if !status.is_success() {
            let message = extract_error_message(&body)
                .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
            return Err(Error::internal(message));
        }

        let summary = extract_summary(&body).unwrap_or_else(|| body.to_string());

        Ok(ExecutionOutcome {
            plugin: self.plugin_key().to_owned(),
            message: summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn approval_with(action_type: &str, payload: Value, action_target: Option<&str>) -> ActionApproval {
        ActionApproval {
            id: "appr_1".to_owned(),
            workspace_id: "ws_1".to_owned(),
            context_id: "ctx_1".to_owned(),
            connector: "cli".to_owned(),
            external_id: "local".to_owned(),
            requester_user_id: "user_1".to_owned(),
            action_type: action_type.to_owned(),
            action_target: action_target.map(str::to_owned),
            action_summary: None,
            payload: payload.as_object().cloned().unwrap_or_else(Map::new),
            status: crate::domain::ApprovalStatus::Approved,
            approver_user_id: None,
            denied_reason: None,
            execution_status: crate::domain::ExecutionStatus::NotExecuted,
            execution_message: None,
            executor_plugin: None,
            executed_at: None,
        }
    }

    #[test]
    fn find_goal_falls_back_to_action_summary() {
        let mut approval = approval_with("agentic_web", json!({}), None);
        approval.action_summary = Some("book a flight".to_owned());
        assert_eq!(find_goal(&approval).as_deref(), Some("book a flight"));
    }

    #[test]
    fn find_target_url_checks_nested_request_object() {
        let approval = approval_with(
            "agentic_web",
            json!({"request": {"url": "https://example.com"}}),
            None,
        );
        assert_eq!(find_target_url(&approval).as_deref(), Some("https://example.com"));
    }

    #[test]
    fn is_async_detects_type_suffix_and_flag() {
        let plugin = AgenticWebPlugin::new(reqwest::Client::new(), "http://x".to_owned());
        assert!(plugin.is_async(&approval_with("agentic_web_async", json!({}), None)));
        assert!(plugin.is_async(&approval_with("agentic_web", json!({"async": true}), None)));
        assert!(!plugin.is_async(&approval_with("agentic_web", json!({}), None)));
    }

    #[test]
    fn extract_summary_prefers_run_id() {
        let body = json!({"run_id": "abc123", "message": "queued"});
        assert_eq!(extract_summary(&body).as_deref(), Some("run_id: abc123"));
    }
}
