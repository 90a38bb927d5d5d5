use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use super::{ExecutionOutcome, ExecutorContext, ExecutorPlugin};
use crate::domain::ActionApproval;
use crate::error::{Error, Result};

/// Fires an arbitrary HTTP request, built from the approval's payload.
pub struct WebhookPlugin {
    client: reqwest::Client,
}

impl WebhookPlugin {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutorPlugin for WebhookPlugin {
    fn plugin_key(&self) -> &'static str {
        "webhook"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["http_request", "webhook"]
    }

    async fn execute(
        &self,
        _ctx: &ExecutorContext,
        approval: &ActionApproval,
    ) -> Result<ExecutionOutcome> {
        let payload = &approval.payload;

        let url = approval
            .action_target
            .clone()
            .or_else(|| payload.get("url").and_then(Value::as_str).map(str::to_owned))
            .ok_or_else(|| Error::internal("webhook action has no url"))?;

        let parsed = url::Url::parse(&url)
            .map_err(|e| Error::internal(format!("webhook url is invalid: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::internal(format!(
                "webhook url scheme must be http or https, got '{}'",
                parsed.scheme()
            )));
        }

        let method = payload
            .get("method")
            .and_then(Value::as_str)
            .map(|m| m.to_uppercase())
            .unwrap_or_else(|| "POST".to_owned());
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| Error::internal(format!("invalid http method: {e}")))?;

        let mut request = self.client.request(method, parsed);

        if let Some(headers) = payload.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        if let Some(body) = payload.get("body").and_then(Value::as_str) {
            request = request.body(body.to_owned());
        } else if let Some(json_body) = payload.get("json") {
            request = request.json(json_body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::internal(format!("webhook request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::internal(format!(
                "status={} body={body}",
                status.as_u16()
            )));
        }

        Ok(ExecutionOutcome {
            plugin: self.plugin_key().to_owned(),
            message: format!("webhook request completed with status {}", status.as_u16()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval_with_payload(action_type: &str, payload: Value) -> ActionApproval {
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
            payload: payload.as_object().cloned().unwrap_or_default(),
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
    async fn missing_url_is_an_error() {
        let plugin = WebhookPlugin::new(reqwest::Client::new());
        let ctx = ExecutorContext {
            workspace_root: std::env::temp_dir(),
            default_timeout_secs: 30,
            max_output_bytes: 1024,
            allowed_commands: vec![],
        };
        let approval = approval_with_payload("webhook", json!({}));
        let err = plugin.execute(&ctx, &approval).await.unwrap_err();
        assert!(err.to_string().contains("no url"));
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let plugin = WebhookPlugin::new(reqwest::Client::new());
        let ctx = ExecutorContext {
            workspace_root: std::env::temp_dir(),
            default_timeout_secs: 30,
            max_output_bytes: 1024,
            allowed_commands: vec![],
        };
        let approval = approval_with_payload("webhook", json!({"url": "ftp://example.com/x"}));
        let err = plugin.execute(&ctx, &approval).await.unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }
}
