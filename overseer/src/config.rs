//! TOML-backed configuration: the file at `~/.overseer/config.toml`, loaded
//! once at startup and consulted by the gateway, agent loop, and CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::util;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub database_path: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    pub channels: ChannelsConfig,
    pub agents: AgentsConfig,
    pub policy: PolicyConfig,
    pub tool_policies: ToolPoliciesConfig,
    pub exec: ExecConfig,
    pub mcp: McpConfig,
    pub pairing: PairingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            workspace_root: None,
            channels: ChannelsConfig::default(),
            agents: AgentsConfig::default(),
            policy: PolicyConfig::default(),
            tool_policies: ToolPoliciesConfig::default(),
            exec: ExecConfig::default(),
            mcp: McpConfig::default(),
            pairing: PairingConfig::default(),
        }
    }
}

impl BotConfig {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(util::database_path)
    }

    #[must_use]
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| util::config_dir().join("workspaces"))
    }
}

/// Per-connector settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub allow_from: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub allow_from: Vec<String>,
}

/// Default model settings for the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    pub model: String,
    pub max_iterations: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_owned(),
            max_iterations: 12,
        }
    }
}

/// The default [`crate::domain::Policy`] serialized for the config file;
/// converted to the domain type at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_loop_steps: u32,
    pub max_tool_calls_per_turn: u32,
    pub max_input_chars: usize,
    pub max_turn_duration_secs: u64,
    pub min_final_confidence: f64,
    pub allowed_tools: Option<Vec<String>>,
    pub allowed_tool_classes: Option<Vec<String>>,
    pub max_autonomous_tasks_per_hour: u32,
    pub max_autonomous_tasks_per_day: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let d = crate::domain::Policy::default();
        Self {
            max_loop_steps: d.max_loop_steps,
            max_tool_calls_per_turn: d.max_tool_calls_per_turn,
            max_input_chars: d.max_input_chars,
            max_turn_duration_secs: d.max_turn_duration_secs,
            min_final_confidence: d.min_final_confidence,
            allowed_tools: d.allowed_tools,
            allowed_tool_classes: d.allowed_tool_classes,
            max_autonomous_tasks_per_hour: d.max_autonomous_tasks_per_hour,
            max_autonomous_tasks_per_day: d.max_autonomous_tasks_per_day,
        }
    }
}

impl From<&PolicyConfig> for crate::domain::Policy {
    fn from(c: &PolicyConfig) -> Self {
        Self {
            max_loop_steps: c.max_loop_steps,
            max_tool_calls_per_turn: c.max_tool_calls_per_turn,
            max_input_chars: c.max_input_chars,
            max_turn_duration_secs: c.max_turn_duration_secs,
            min_final_confidence: c.min_final_confidence,
            allowed_tools: c.allowed_tools.clone(),
            allowed_tool_classes: c.allowed_tool_classes.clone(),
            max_autonomous_tasks_per_hour: c.max_autonomous_tasks_per_hour,
            max_autonomous_tasks_per_day: c.max_autonomous_tasks_per_day,
        }
    }
}

/// Whether a tool may run without, or never with, human confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicy {
    Auto,
    RequireConfirmation,
    Forbidden,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::RequireConfirmation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPoliciesConfig {
    pub default_policy: ToolPolicy,
    pub tools: HashMap<String, ToolPolicy>,
    pub confirmation_timeout: u64,
}

impl Default for ToolPoliciesConfig {
    fn default() -> Self {
        Self {
            default_policy: ToolPolicy::RequireConfirmation,
            tools: HashMap::new(),
            confirmation_timeout: 60,
        }
    }
}

/// Sandboxed command execution settings, consulted by the
/// `sandboxed_command` executor plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub allowed_commands: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            working_dir: None,
            timeout_secs: 30,
        }
    }
}

/// Path to the MCP server manifest and refresh cadence, consulted by
/// [`crate::mcp_manager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub manifest_path: Option<PathBuf>,
    pub refresh_interval_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            manifest_path: None,
            refresh_interval_secs: 300,
        }
    }
}

impl McpConfig {
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| util::config_dir().join("ext").join("mcp").join("servers.json"))
    }
}

/// Defaults applied to newly created pairing tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub default_role: String,
    pub token_ttl_secs: i64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            default_role: "admin".to_owned(),
            token_ttl_secs: 15 * 60,
        }
    }
}

/// Path the config file loads from and saves to: `~/.overseer/config.toml`
/// unless overridden.
#[must_use]
pub fn config_path() -> PathBuf {
    util::config_path()
}

/// Load the config file at `path`, or fall back to defaults if it does not
/// exist yet.
pub async fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        return Ok(BotConfig::default());
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(ConfigError::Io)?;
    let config: BotConfig =
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(config)
}

/// Serialize and write `config` to `path`, creating parent directories as
/// needed.
pub async fn save_config(path: &Path, config: &BotConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ConfigError::Io)?;
    }
    let contents =
        toml::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    tokio::fs::write(path, contents)
        .await
        .map_err(ConfigError::Io)?;
    Ok(())
}

/// Write a default config to `path` unless one already exists there.
pub async fn init_config(path: &Path) -> Result<BotConfig> {
    if path.exists() {
        return load_config(path).await;
    }
    let config = BotConfig::default();
    save_config(path, &config).await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_config_converts_to_domain_policy() {
        let cfg = PolicyConfig::default();
        let policy: crate::domain::Policy = (&cfg).into();
        assert_eq!(policy.max_loop_steps, cfg.max_loop_steps);
        assert_eq!(policy.max_tool_calls_per_turn, cfg.max_tool_calls_per_turn);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = BotConfig::default();
        let text = toml::to_string_pretty(&config).expect("serialize");
        let parsed: BotConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.agents.defaults.model, config.agents.defaults.model);
    }

    #[tokio::test]
    async fn load_config_missing_file_returns_defaults() {
        let dir = std::env::temp_dir().join(format!("overseer-test-{}", util::generate_id("cfg")));
        let path = dir.join("config.toml");
        let config = load_config(&path).await.expect("load");
        assert_eq!(config.agents.defaults.max_iterations, 12);
    }

    #[tokio::test]
    async fn init_config_writes_then_loads_same_values() {
        let dir = std::env::temp_dir().join(format!("overseer-test-{}", util::generate_id("cfg")));
        let path = dir.join("config.toml");
        let created = init_config(&path).await.expect("init");
        let loaded = load_config(&path).await.expect("load");
        assert_eq!(
            created.agents.defaults.model,
            loaded.agents.defaults.model
        );
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
