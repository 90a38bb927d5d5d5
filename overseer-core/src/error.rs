//! Unified error type aggregating the domain errors owned by submodules.

pub use crate::mcp::McpError;
pub use crate::tool::{ToolError, ToolSetError};

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error surfaced by a [`crate::model::Model`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The provider's API key / credential was not configured.
    #[error("missing credentials: set {0}")]
    MissingCredentials(&'static str),

    /// The HTTP request to the provider failed before a response was received.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider returned a non-success HTTP status.
    #[error("provider returned HTTP {status}: {body}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// The top-level error type for this crate.
///
/// Each variant wraps a domain-specific error owned by its respective
/// module; `#[from]` conversions keep call sites using plain `?`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Model call failed.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Tool execution error.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Tool-set lookup/dispatch error.
    #[error("tool set error: {0}")]
    ToolSet(#[from] ToolSetError),

    /// MCP client/server error.
    #[error("mcp error: {0}")]
    Mcp(#[from] McpError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
