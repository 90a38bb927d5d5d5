//! Adapts a tool advertised by an MCP server into a [`DynTool`].

use std::borrow::Cow;

use async_trait::async_trait;
use rmcp::model::RawContent;
use serde_json::Value;

use super::{DynTool, ToolError};

/// A tool backed by a live MCP server connection.
///
/// `name` is the deterministic, registry-wide name assigned by the MCP
/// manager (not necessarily the server's own tool name).
#[derive(Clone)]
pub struct McpServerTool {
    name: String,
    definition: rmcp::model::Tool,
    sink: rmcp::service::ServerSink,
}

impl McpServerTool {
    /// Wrap a server-advertised tool definition under the registry name `name`.
    #[must_use]
    pub const fn new(
        name: String,
        definition: rmcp::model::Tool,
        sink: rmcp::service::ServerSink,
    ) -> Self {
        Self {
            name,
            definition,
            sink,
        }
    }
}

#[async_trait]
impl DynTool for McpServerTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.definition
            .description
            .clone()
            .unwrap_or(Cow::Borrowed(""))
            .into_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(&self.definition.input_schema).unwrap_or_default()
    }

    async fn call_json(&self, args: Value) -> Result<Value, ToolError> {
        let result = self
            .sink
            .call_tool(rmcp::model::CallToolRequestParams {
                meta: None,
                name: self.definition.name.clone(),
                arguments: args.as_object().cloned(),
                task: None,
            })
            .await
            .map_err(|e| ToolError::execution(format!("mcp call failed: {e}")))?;

        if result.is_error == Some(true) {
            let message = extract_text(&result.content);
            return Err(ToolError::execution(if message.is_empty() {
                "mcp tool returned an error with no message".to_owned()
            } else {
                message
            }));
        }

        Ok(Value::String(extract_text(&result.content)))
    }
}

fn extract_text(content: &[rmcp::model::Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(raw) => Some(raw.text.clone()),
            RawContent::Image(raw) => Some(format!("data:{};base64,{}", raw.mime_type, raw.data)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
