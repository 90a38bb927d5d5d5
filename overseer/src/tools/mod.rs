//! In-process tool registry: a `name -> tool` map with per-tool metadata
//! (class, approval requirement) layered on top of
//! `overseer_core::tool::ToolSet`, plus namespaced bulk replace for the MCP
//! manager's connect/refresh cycle.

mod registry;

pub use registry::{ToolMeta, ToolRegistry};
