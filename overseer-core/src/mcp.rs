//! MCP (Model Context Protocol) client integration.
//!
//! Provides a thin wrapper around `rmcp` for connecting to MCP servers over
//! stdio or streamable HTTP and listing/calling the tools they expose.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{McpClient, McpClientConfig, McpServers};
pub use error::McpError;
pub use transport::TransportConfig;
