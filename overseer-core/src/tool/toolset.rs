//! A registry of [`BoxedTool`]s keyed by name.

use std::collections::HashMap;

use serde_json::Value;

use crate::completion::ToolDefinition;

use super::{BoxedTool, Tool, ToolSetError};

/// A collection of tools addressable by name.
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, BoxedTool>,
}

impl ToolSet {
    /// An empty tool set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strongly-typed tool under its [`Tool::NAME`].
    pub fn add_tool<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(T::NAME.to_owned(), Box::new(tool));
    }

    /// Register an already-boxed tool under an explicit name (used for
    /// MCP-backed tools whose name is only known at connect time).
    pub fn add_boxed(&mut self, name: impl Into<String>, tool: BoxedTool) {
        self.tools.insert(name.into(), tool);
    }

    /// Remove a tool, returning it if present.
    pub fn delete_tool(&mut self, name: &str) -> Option<BoxedTool> {
        self.tools.remove(name)
    }

    /// Whether a tool is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set holds no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Tool definitions for every registered tool, in advertisement order.
    pub async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolSetError> {
        Ok(self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name(),
                description: tool.description(),
                parameters: tool.parameters_schema(),
            })
            .collect())
    }

    /// Dispatch a call by tool name with raw JSON arguments.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolSetError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolSetError::ToolNotFoundError(name.to_owned()))?;
        Ok(tool.call_json(args).await?)
    }
}

/// Builder for assembling a [`ToolSet`] fluently.
#[derive(Default)]
pub struct ToolSetBuilder {
    set: ToolSet,
}

impl ToolSetBuilder {
    /// Start with an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strongly-typed tool.
    #[must_use]
    pub fn tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.set.add_tool(tool);
        self
    }

    /// Register an already-boxed tool under an explicit name.
    #[must_use]
    pub fn boxed(mut self, name: impl Into<String>, tool: BoxedTool) -> Self {
        self.set.add_boxed(name, tool);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> ToolSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    struct Echo;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("echo failed")]
    struct EchoError;

    #[async_trait]
    impl Tool for Echo {
        const NAME: &'static str = "echo";
        type Args = EchoArgs;
        type Output = String;
        type Error = EchoError;

        fn description(&self) -> String {
            "Echo the input text".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
            Ok(args.text)
        }
    }

    #[tokio::test]
    async fn registers_and_calls_by_name() {
        let mut set = ToolSet::new();
        set.add_tool(Echo);

        let defs = set.get_tool_definitions().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        let result = set.call("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result, json!("hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let set = ToolSet::new();
        let err = set.call("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolSetError::ToolNotFoundError(_)));
    }

    #[test]
    fn delete_removes_tool() {
        let mut set = ToolSet::new();
        set.add_tool(Echo);
        assert!(set.contains("echo"));
        set.delete_tool("echo");
        assert!(!set.contains("echo"));
    }
}
