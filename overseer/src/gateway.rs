//! Gateway service for running the complete runtime.
//!
//! The gateway is the unified entry point that wires together:
//! - the message bus
//! - the channel manager (CLI, Telegram, Discord)
//! - the MCP manager's bootstrap/refresh cycle
//! - the objective scheduler
//! - the agent loop, pumped from inbound bus traffic

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use overseer_core::model::Model;

use crate::agent::{AgentLoop, ExecuteContext, ExecuteInput};
use crate::bus::MessageBus;
use crate::channel::ChannelManager;
use crate::channels::CliChannel;
#[cfg(feature = "discord")]
use crate::channels::{DiscordChannel, discord::DiscordChannelConfig};
#[cfg(feature = "telegram")]
use crate::channels::{TelegramChannel, telegram::TelegramChannelConfig};
use crate::config::BotConfig;
use crate::domain::{Connector, Policy, Role};
use crate::error::Result;
use crate::events::{InboundMessage, OutboundMessage};
use crate::mcp_manager::{McpManager, load_manifest, load_workspace_overrides, merge_workspace_overrides};
use crate::objectives::{ObjectiveScheduler, TaskWorker};
use crate::store::Store;
use crate::tools::ToolRegistry;
use crate::util;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bot configuration.
    pub bot_config: BotConfig,
    /// Slug of the workspace this gateway serves. Created on first run if
    /// it does not already exist.
    pub workspace_slug: String,
    /// Whether to enable the CLI channel.
    pub enable_cli: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bot_config: BotConfig::default(),
            workspace_slug: "default".to_owned(),
            enable_cli: true,
        }
    }
}

/// Gateway service that runs the complete runtime for one workspace.
pub struct Gateway<M: Model + Send + Sync + 'static> {
    config: GatewayConfig,
    bus: MessageBus,
    channel_manager: ChannelManager,
    store: Store,
    workspace_id: String,
    tools: Arc<ToolRegistry>,
    agent_loop: Arc<AgentLoop<M>>,
    mcp: Arc<McpManager>,
    scheduler: ObjectiveScheduler,
    task_worker: Arc<TaskWorker<M>>,
    running: Arc<RwLock<bool>>,
}

impl<M: Model + Send + Sync + 'static> std::fmt::Debug for Gateway<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("workspace_id", &self.workspace_id)
            .finish_non_exhaustive()
    }
}

impl<M: Model + Send + Sync + 'static> Gateway<M> {
    /// Open the store, resolve (or create) the configured workspace, and
    /// wire the agent loop, MCP manager, and scheduler around it.
    pub async fn new(model: M, config: GatewayConfig) -> Result<Self> {
        let store = Store::open(&config.bot_config.database_path()).await?;

        let workspace = match store.get_workspace_by_slug(&config.workspace_slug).await? {
            Some(w) => w,
            None => {
                let root = config.bot_config.workspace_root().join(&config.workspace_slug);
                tokio::fs::create_dir_all(&root).await?;
                store
                    .create_workspace(&config.workspace_slug, &root.to_string_lossy())
                    .await?
            }
        };

        let tools = Arc::new(ToolRegistry::new());
        let mcp = Arc::new(McpManager::new(Arc::clone(&tools)));

        let base_policy: Policy = (&config.bot_config.policy).into();
        let agent_loop = Arc::new(AgentLoop::new(
            Arc::new(model),
            Arc::clone(&tools),
            store.clone(),
            base_policy,
        ));

        let scheduler = ObjectiveScheduler::new(store.clone());
        let workspace_root = config.bot_config.workspace_root().join(&config.workspace_slug);
        let task_worker = Arc::new(TaskWorker::new(
            store.clone(),
            Arc::clone(&agent_loop),
            util::generate_id("worker"),
            workspace_root,
        ));
        let bus = MessageBus::new();

        Ok(Self {
            channel_manager: ChannelManager::new(bus.clone()),
            bus,
            workspace_id: workspace.id,
            store,
            tools,
            agent_loop,
            mcp,
            scheduler,
            task_worker,
            config,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Get a reference to the message bus.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Get a reference to the channel manager.
    #[must_use]
    pub const fn channel_manager(&self) -> &ChannelManager {
        &self.channel_manager
    }

    /// Get a reference to the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Register channels based on configuration.
    async fn setup_channels(&self) -> Result<()> {
        if self.config.enable_cli {
            let cli = CliChannel::new();
            self.channel_manager.register(cli).await;
            info!("CLI channel enabled");
        }

        #[cfg(feature = "telegram")]
        if self.config.bot_config.channels.telegram.enabled {
            if let Some(ref token) = self.config.bot_config.channels.telegram.token {
                let mut tg_config = TelegramChannelConfig::new(token);
                for user_id_str in &self.config.bot_config.channels.telegram.allow_from {
                    if let Ok(user_id) = user_id_str.parse::<i64>() {
                        tg_config = tg_config.allow_user(user_id);
                    }
                }
                let telegram = TelegramChannel::new(tg_config);
                self.channel_manager.register(telegram).await;
                info!("Telegram channel enabled");
            } else {
                error!("Telegram enabled but no token configured");
            }
        }

        #[cfg(feature = "discord")]
        if self.config.bot_config.channels.discord.enabled {
            if let Some(ref token) = self.config.bot_config.channels.discord.token {
                let mut dc_config = DiscordChannelConfig::new(token);
                for user_id_str in &self.config.bot_config.channels.discord.allow_from {
                    if let Ok(user_id) = user_id_str.parse::<u64>() {
                        dc_config = dc_config.allow_user(user_id);
                    }
                }
                let discord = DiscordChannel::new(dc_config);
                self.channel_manager.register(discord).await;
                info!("Discord channel enabled");
            } else {
                error!("Discord enabled but no token configured");
            }
        }

        Ok(())
    }

    /// Load the MCP manifest (if configured) and connect every enabled
    /// server once. Failures are recorded per-server, not fatal to startup.
    async fn bootstrap_mcp(&self) {
        let path = self.config.bot_config.mcp.manifest_path();
        let manifest = match load_manifest(&path).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to load MCP manifest");
                return;
            }
        };

        let overrides_path = self
            .config
            .bot_config
            .workspace_root()
            .join(&self.config.workspace_slug)
            .join("context")
            .join("mcp")
            .join("servers.json");
        let overrides = match load_workspace_overrides(&overrides_path).await {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!(error = %e, path = %overrides_path.display(), "failed to load MCP workspace overrides");
                Vec::new()
            }
        };

        let merged = merge_workspace_overrides(&manifest.servers, &overrides);
        self.mcp.bootstrap(&merged).await;
    }

    /// Resolve the user behind an inbound message, auto-provisioning a
    /// local admin identity for the CLI connector (trusted by definition)
    /// and leaving every other connector gated behind pairing.
    async fn resolve_requester(&self, connector: Connector, external_id: &str) -> Result<Option<String>> {
        if let Some(identity) = self.store.get_identity_by_connector(connector, external_id).await? {
            return Ok(Some(identity.user_id));
        }
        if connector == Connector::Cli {
            let user = self.store.create_user("local", Role::Admin).await?;
            self.store.upsert_identity(&user.id, connector, external_id).await?;
            return Ok(Some(user.id));
        }
        Ok(None)
    }

    /// Run one inbound message through the agent loop and publish the
    /// reply as outbound.
    async fn handle_inbound(&self, inbound: InboundMessage) -> Result<()> {
        let Some(connector) = Connector::parse(&inbound.channel) else {
            warn!(channel = %inbound.channel, "dropping message from unknown connector");
            return Ok(());
        };

        let Some(user_id) = self.resolve_requester(connector, &inbound.sender_id).await? else {
            self.bus
                .publish_outbound(OutboundMessage::reply_to(
                    &inbound,
                    "You're not paired yet. Ask an admin for a pairing code, then send `/pair <code>`.",
                ))
                .await?;
            return Ok(());
        };

        let context = self
            .store
            .get_or_create_context(&self.workspace_id, connector, &inbound.chat_id)
            .await?;

        let exec_ctx = ExecuteContext {
            workspace_id: self.workspace_id.clone(),
            context_id: context.id,
            connector: connector.as_str().to_owned(),
            external_id: inbound.chat_id.clone(),
            requester_user_id: user_id,
            workspace_root: self.config.bot_config.workspace_root().join(&self.config.workspace_slug),
            approval_token: None,
        };

        let outcome = self
            .agent_loop
            .execute(&exec_ctx, None, ExecuteInput::new(inbound.content.clone()))
            .await?;

        self.bus
            .publish_outbound(OutboundMessage::reply_to(&inbound, outcome.reply))
            .await?;
        Ok(())
    }

    /// Run the gateway: start every configured channel, bootstrap MCP,
    /// start the objective scheduler, then pump inbound messages through
    /// the agent loop until the bus closes.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        *self.running.write().await = true;
        info!("gateway starting");

        self.setup_channels().await?;

        let channel_results = self.channel_manager.start_all().await;
        for result in &channel_results {
            if let Err(e) = result {
                error!(error = %e, "failed to start channel");
            }
        }

        self.bootstrap_mcp().await;
        let scheduler_handle = self.scheduler.start();
        let worker_handle = Arc::clone(&self.task_worker).start();

        info!("gateway started, press ctrl+c to stop");

        loop {
            let Some(inbound) = self.bus.consume_inbound().await else {
                break;
            };
            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_inbound(inbound).await {
                    error!(error = %e, "turn failed");
                }
            });
        }

        worker_handle.abort();
        scheduler_handle.abort();
        self.channel_manager.stop_all().await;
        *self.running.write().await = false;
        info!("gateway stopped");
        Ok(())
    }

    /// Check if the gateway is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Get channel statuses.
    pub async fn status(&self) -> GatewayStatus {
        let channel_statuses = self.channel_manager.status_all().await;
        let bus_stats = self.bus.stats().await;

        GatewayStatus {
            running: *self.running.read().await,
            channels: channel_statuses
                .into_iter()
                .map(|s| ChannelStatusInfo {
                    name: s.name,
                    state: format!("{:?}", s.state),
                    messages_received: s.messages_received,
                    messages_sent: s.messages_sent,
                    healthy: s.healthy,
                })
                .collect(),
            total_inbound: bus_stats.inbound_count,
            total_outbound: bus_stats.outbound_count,
        }
    }
}

/// Gateway status information.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStatus {
    /// Whether the gateway is running.
    pub running: bool,
    /// Channel statuses.
    pub channels: Vec<ChannelStatusInfo>,
    /// Total inbound messages processed.
    pub total_inbound: u64,
    /// Total outbound messages processed.
    pub total_outbound: u64,
}

/// Channel status info for gateway status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelStatusInfo {
    /// Channel name.
    pub name: String,
    /// Channel state.
    pub state: String,
    /// Messages received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Whether the channel is healthy.
    pub healthy: bool,
}

/// Builder for creating a [`Gateway`].
pub struct GatewayBuilder<M: Model + Send + Sync + 'static> {
    model: Option<M>,
    config: GatewayConfig,
}

impl<M: Model + Send + Sync + 'static> std::fmt::Debug for GatewayBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<M: Model + Send + Sync + 'static> Default for GatewayBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model + Send + Sync + 'static> GatewayBuilder<M> {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: None,
            config: GatewayConfig::default(),
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: M) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the bot configuration.
    #[must_use]
    pub fn bot_config(mut self, config: BotConfig) -> Self {
        self.config.bot_config = config;
        self
    }

    /// Set the workspace slug this gateway serves.
    #[must_use]
    pub fn workspace_slug(mut self, slug: impl Into<String>) -> Self {
        self.config.workspace_slug = slug.into();
        self
    }

    /// Enable or disable the CLI channel.
    #[must_use]
    pub const fn enable_cli(mut self, enable: bool) -> Self {
        self.config.enable_cli = enable;
        self
    }

    /// Build the gateway.
    ///
    /// # Panics
    ///
    /// Panics if no model was set.
    pub async fn build(self) -> Result<Gateway<M>> {
        let model = self.model.expect("model is required");
        Gateway::new(model, self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.enable_cli);
        assert_eq!(config.workspace_slug, "default");
    }
}
