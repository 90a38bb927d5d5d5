//! Model, tool, and MCP abstractions shared by the agent runtime: the seam
//! between the agent loop and whatever concrete LLM provider, built-in tool,
//! or MCP server a deployment wires in.

pub mod completion;
pub mod error;
pub mod mcp;
pub mod model;
pub mod prelude;
pub mod telemetry;
pub mod tool;
pub mod tools;

pub use error::{Error, Result};
