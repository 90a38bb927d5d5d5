//! Convenience re-exports for downstream crates.

pub use crate::completion::{
    FinishReason, GenerateOptions, Message, ModelResponse, Role, TokenUsage, ToolCallRequest,
    ToolDefinition,
};
pub use crate::error::{Error, ModelError, Result};
pub use crate::mcp::{McpClient, McpClientConfig, McpError, McpServers, TransportConfig};
pub use crate::model::{AnthropicModel, Model};
pub use crate::tool::{BoxedTool, DynTool, McpServerTool, Tool, ToolError, ToolSet, ToolSetBuilder};
