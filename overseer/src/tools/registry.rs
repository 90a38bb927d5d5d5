use std::collections::HashMap;

use overseer_core::tool::{BoxedTool, ToolSet};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Per-tool metadata the agent loop and approval router consult: which
/// class a tool belongs to (for `Policy::allowed_tool_classes`) and whether
/// calling it always needs a pending [`crate::domain::ActionApproval`]
/// regardless of the per-connector `ToolPolicy`.
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub class: String,
    pub requires_approval: bool,
}

impl ToolMeta {
    #[must_use]
    pub fn new(class: impl Into<String>, requires_approval: bool) -> Self {
        Self {
            class: class.into(),
            requires_approval,
        }
    }
}

impl Default for ToolMeta {
    fn default() -> Self {
        Self::new("general", false)
    }
}

/// Registry of callable tools, addressable by name.
///
/// Tools are grouped into namespaces (`"local"` for in-process tools,
/// `mcp_<server>` for a connected MCP server's tools) so the MCP manager
/// can atomically detach and replace one server's tools without disturbing
/// any other namespace. All operations take `&self` and lock internally;
/// callers share one registry behind an `Arc`.
pub struct ToolRegistry {
    tools: RwLock<ToolSet>,
    meta: RwLock<HashMap<String, ToolMeta>>,
    namespaces: RwLock<HashMap<String, Vec<String>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(ToolSet::new()),
            meta: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Register one tool under `namespace`, replacing any prior tool of the
    /// same name.
    pub async fn register(
        &self,
        namespace: &str,
        name: impl Into<String>,
        tool: BoxedTool,
        meta: ToolMeta,
    ) {
        let name = name.into();
        self.tools.write().await.add_boxed(name.clone(), tool);
        self.meta.write().await.insert(name.clone(), meta);
        let mut namespaces = self.namespaces.write().await;
        let members = namespaces.entry(namespace.to_owned()).or_default();
        if !members.contains(&name) {
            members.push(name);
        }
    }

    /// Atomically detach every tool previously registered under
    /// `namespace` and install `tools` in its place.
    ///
    /// Readers (`describe_all`, `execute`, `contains`) observe either the
    /// fully-old or fully-new set, never a partial one, since the detach
    /// and the inserts happen while holding the write locks.
    pub async fn replace_namespace(
        &self,
        namespace: &str,
        tools: Vec<(String, BoxedTool, ToolMeta)>,
    ) {
        let mut tool_set = self.tools.write().await;
        let mut meta_map = self.meta.write().await;
        let mut namespaces = self.namespaces.write().await;

        if let Some(old_members) = namespaces.remove(namespace) {
            for name in old_members {
                tool_set.delete_tool(&name);
                meta_map.remove(&name);
            }
        }

        let mut new_members = Vec::with_capacity(tools.len());
        for (name, tool, meta) in tools {
            tool_set.add_boxed(name.clone(), tool);
            meta_map.insert(name.clone(), meta);
            new_members.push(name);
        }
        namespaces.insert(namespace.to_owned(), new_members);
    }

    /// Whether a tool is registered under `name`.
    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains(name)
    }

    /// Metadata for a registered tool, if any.
    pub async fn meta(&self, name: &str) -> Option<ToolMeta> {
        self.meta.read().await.get(name).cloned()
    }

    /// Names of every tool currently registered under `namespace`.
    pub async fn namespace_members(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of registered tools across all namespaces.
    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Whether the registry holds no tools.
    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// A sorted textual catalog of every tool, suitable for embedding in a
    /// model prompt: one `- name: description` line per tool, followed by
    /// an indented `Schema: <json>` line.
    pub async fn describe_all(&self) -> Result<String> {
        let tools = self.tools.read().await;
        let mut defs = tools.get_tool_definitions().await.map_err(Error::from)?;
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        let mut out = String::new();
        for def in defs {
            out.push_str(&format!("- {}: {}\n", def.name, def.description));
            out.push_str(&format!("  Schema: {}\n", def.parameters));
        }
        Ok(out)
    }

    /// Tool definitions for every registered tool, sorted by name.
    pub async fn list_definitions(&self) -> Result<Vec<overseer_core::completion::ToolDefinition>> {
        let tools = self.tools.read().await;
        let mut defs = tools.get_tool_definitions().await.map_err(Error::from)?;
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    /// Call a tool by name. The underlying `ToolSet` deserializes `args`
    /// into the tool's argument type before invoking it, which is this
    /// registry's argument-validation step; a malformed-argument failure
    /// and an execution failure both surface as `ErrorKind::ToolExecutionError`.
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        let tools = self.tools.read().await;
        tools.call(name, args).await.map_err(|e| {
            Error::Core(overseer_core::Error::ToolSet(e))
        })
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
    impl overseer_core::tool::Tool for Echo {
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
    async fn register_and_execute() {
        let registry = ToolRegistry::new();
        registry
            .register(
                "local",
                "echo",
                Box::new(Echo),
                ToolMeta::new("text", false),
            )
            .await;

        assert!(registry.contains("echo").await);
        let result = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result, json!("hi"));
        let meta = registry.meta("echo").await.unwrap();
        assert_eq!(meta.class, "text");
        assert!(!meta.requires_approval);
    }

    #[tokio::test]
    async fn replace_namespace_detaches_old_tools() {
        let registry = ToolRegistry::new();
        registry
            .replace_namespace(
                "mcp_server1",
                vec![(
                    "mcp_server1__old".to_owned(),
                    Box::new(Echo),
                    ToolMeta::default(),
                )],
            )
            .await;
        assert!(registry.contains("mcp_server1__old").await);

        registry.replace_namespace("mcp_server1", vec![]).await;
        assert!(!registry.contains("mcp_server1__old").await);
        assert_eq!(registry.namespace_members("mcp_server1").await.len(), 0);
    }

    #[tokio::test]
    async fn describe_all_is_sorted() {
        let registry = ToolRegistry::new();
        registry
            .register("local", "zulu", Box::new(Echo), ToolMeta::default())
            .await;
        let catalog = registry.describe_all().await.unwrap();
        assert!(catalog.contains("- zulu: Echo the input text"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ToolExecutionError);
    }
}
