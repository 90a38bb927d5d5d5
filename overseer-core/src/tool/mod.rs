//! Tool trait, type-erased tool registry, and MCP-backed tool wrapper.
//!
//! [`Tool`] is the strongly-typed interface implementations reach for; the
//! agent loop and MCP manager instead work with [`BoxedTool`] so tools with
//! different argument types can live in one [`ToolSet`].

pub mod errors;
mod mcp;
mod toolset;

pub use errors::{ToolError, ToolSetError};
pub use mcp::McpServerTool;
pub use toolset::{ToolSet, ToolSetBuilder};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::completion::ToolDefinition;

/// A strongly-typed tool invoked with a deserialized argument struct.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable, unique name under which the tool is registered.
    const NAME: &'static str;
    /// Deserialized argument type.
    type Args: DeserializeOwned + Send;
    /// Serializable return type.
    type Output: Serialize;
    /// Error type surfaced on failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// One-line description shown to the model.
    fn description(&self) -> String;

    /// JSON schema describing `Args`.
    fn parameters_schema(&self) -> Value;

    /// Run the tool.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;

    /// Build the [`ToolDefinition`] advertised to a model.
    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_owned(),
            description: self.description(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Object-safe counterpart of [`Tool`] used for dynamic dispatch.
///
/// Every [`Tool`] gets a blanket [`DynTool`] implementation that
/// (de)serializes through JSON at the boundary.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Tool name as registered.
    fn name(&self) -> String;
    /// One-line description shown to the model.
    fn description(&self) -> String;
    /// JSON schema for the tool's arguments.
    fn parameters_schema(&self) -> Value;
    /// Invoke the tool with raw JSON arguments, returning a raw JSON result.
    async fn call_json(&self, args: Value) -> Result<Value, ToolError>;
}

/// A type-erased, boxed tool.
pub type BoxedTool = Box<dyn DynTool>;

#[async_trait]
impl<T> DynTool for T
where
    T: Tool,
{
    fn name(&self) -> String {
        T::NAME.to_owned()
    }

    fn description(&self) -> String {
        Tool::description(self)
    }

    fn parameters_schema(&self) -> Value {
        Tool::parameters_schema(self)
    }

    async fn call_json(&self, args: Value) -> Result<Value, ToolError> {
        let typed: T::Args = serde_json::from_value(args)?;
        let output = self
            .call(typed)
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?;
        Ok(serde_json::to_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    struct Adder;

    #[derive(Deserialize)]
    struct OperationArgs {
        x: i32,
        y: i32,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("math error")]
    struct MathError;

    #[async_trait]
    impl Tool for Adder {
        const NAME: &'static str = "add";
        type Args = OperationArgs;
        type Output = i32;
        type Error = MathError;

        fn description(&self) -> String {
            "Add x and y together".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "x": {"type": "number"},
                    "y": {"type": "number"}
                },
                "required": ["x", "y"]
            })
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
            Ok(args.x + args.y)
        }
    }

    #[tokio::test]
    async fn dyn_tool_round_trips_through_json() {
        let tool = Adder;
        let result = DynTool::call_json(&tool, json!({"x": 2, "y": 3}))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn dyn_tool_rejects_malformed_args() {
        let tool = Adder;
        let err = DynTool::call_json(&tool, json!({"x": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
