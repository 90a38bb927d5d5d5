//! Error types for the tool module.

/// Errors that can occur during tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool's handler returned a failure.
    #[error("{0}")]
    Execution(String),

    /// Arguments did not match the tool's declared schema.
    #[error("invalid arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),
}

impl ToolError {
    /// Build a [`ToolError::Execution`] from any displayable failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

/// Errors that can occur during tool-set registry operations.
#[derive(Debug, thiserror::Error)]
pub enum ToolSetError {
    /// The tool itself failed.
    #[error("tool call failed: {0}")]
    ToolCallError(#[from] ToolError),

    /// No tool is registered under the requested name.
    #[error("tool not found: {0}")]
    ToolNotFoundError(String),
}
