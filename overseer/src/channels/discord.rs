//! Discord channel implementation using serenity.
//!
//! # Example
//!
//! ```rust,ignore
//! use overseer::channels::DiscordChannel;
//! use overseer::bus::MessageBus;
//!
//! let config = DiscordChannelConfig::new("YOUR_BOT_TOKEN")
//!     .allow_user(123456789);
//!
//! let bus = MessageBus::new();
//! let discord = DiscordChannel::new(config);
//! discord.start(&bus).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{ChannelId, GatewayIntents, Http, Message as DiscordMessage, Ready};
use serenity::client::{Client, Context, EventHandler};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info};

use crate::bus::{InboundHandle, MessageBus};
use crate::channel::{Channel, ChannelBase, ChannelState, ChannelStatus};
use crate::error::{ChannelError, ChannelResult};
use crate::events::{InboundMessage, OutboundMessage};

/// Discord channel configuration.
#[derive(Debug, Clone)]
pub struct DiscordChannelConfig {
    /// Bot token from the Discord developer portal.
    pub token: String,
    /// Allowed user IDs. Empty means allow all (not recommended).
    pub allowed_users: Vec<u64>,
    /// Allowed channel IDs. Empty means allow all.
    pub allowed_channels: Vec<u64>,
    /// Maximum message length before splitting.
    pub max_message_length: usize,
}

impl DiscordChannelConfig {
    /// Create a new Discord channel config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            allowed_users: Vec::new(),
            allowed_channels: Vec::new(),
            max_message_length: 2000, // Discord's limit
        }
    }

    /// Create config from environment variable `DISCORD_BOT_TOKEN`.
    ///
    /// # Panics
    ///
    /// Panics if `DISCORD_BOT_TOKEN` is not set.
    #[must_use]
    pub fn from_env() -> Self {
        let token = std::env::var("DISCORD_BOT_TOKEN")
            .expect("DISCORD_BOT_TOKEN environment variable not set");
        Self::new(token)
    }

    /// Try to create config from environment variable.
    #[must_use]
    pub fn try_from_env() -> Option<Self> {
        std::env::var("DISCORD_BOT_TOKEN").ok().map(Self::new)
    }

    /// Add an allowed user ID.
    #[must_use]
    pub fn allow_user(mut self, user_id: u64) -> Self {
        self.allowed_users.push(user_id);
        self
    }

    /// Add an allowed channel ID.
    #[must_use]
    pub fn allow_channel(mut self, channel_id: u64) -> Self {
        self.allowed_channels.push(channel_id);
        self
    }

    /// Check if a user is allowed.
    #[must_use]
    pub fn is_user_allowed(&self, user_id: u64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }

    /// Check if a channel is allowed.
    #[must_use]
    pub fn is_channel_allowed(&self, channel_id: u64) -> bool {
        self.allowed_channels.is_empty() || self.allowed_channels.contains(&channel_id)
    }
}

/// Forwards incoming Discord messages onto the bus.
struct Handler {
    bus_handle: InboundHandle,
    allowed_users: Vec<u64>,
    allowed_channels: Vec<u64>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: DiscordMessage) {
        if msg.author.bot {
            return;
        }

        let user_id = msg.author.id.get();
        let channel_id = msg.channel_id.get();
        let user_allowed = self.allowed_users.is_empty() || self.allowed_users.contains(&user_id);
        let channel_allowed = self.allowed_channels.is_empty() || self.allowed_channels.contains(&channel_id);

        if !user_allowed || !channel_allowed {
            debug!(user_id, channel_id, "message from unauthorized user/channel");
            return;
        }

        if msg.content.trim().is_empty() {
            return;
        }

        let inbound = InboundMessage::new("discord", user_id.to_string(), channel_id.to_string(), msg.content.clone());

        if let Err(e) = self.bus_handle.publish(inbound).await {
            error!(error = %e, "failed to publish discord message to bus");
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "discord gateway connected");
    }
}

/// Discord channel implementation.
pub struct DiscordChannel {
    base: ChannelBase,
    config: DiscordChannelConfig,
    http: RwLock<Option<Arc<Http>>>,
    shard_manager: RwLock<Option<Arc<serenity::gateway::ShardManager>>>,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl std::fmt::Debug for DiscordChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordChannel")
            .field("base", &self.base)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DiscordChannel {
    /// Create a new Discord channel with the given configuration.
    #[must_use]
    pub fn new(config: DiscordChannelConfig) -> Self {
        Self {
            base: ChannelBase::new("discord"),
            config,
            http: RwLock::new(None),
            shard_manager: RwLock::new(None),
            shutdown_tx: RwLock::new(None),
        }
    }

    /// Create a Discord channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(DiscordChannelConfig::from_env())
    }

    /// Split a long message into chunks that fit under Discord's message
    /// length limit, breaking on line boundaries where possible.
    fn split_message(text: &str, max_len: usize) -> Vec<String> {
        if text.len() <= max_len {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            if current.len() + line.len() + 1 > max_len {
                if !current.is_empty() {
                    chunks.push(current);
                    current = String::new();
                }
                if line.len() > max_len {
                    for chunk in line.as_bytes().chunks(max_len) {
                        chunks.push(String::from_utf8_lossy(chunk).to_string());
                    }
                    continue;
                }
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn start(&self, bus: &MessageBus) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Starting).await;

        let handler = Handler {
            bus_handle: bus.inbound_handle(),
            allowed_users: self.config.allowed_users.clone(),
            allowed_channels: self.config.allowed_channels.clone(),
        };

        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.config.token, intents)
            .event_handler(handler)
            .await
            .map_err(|e| ChannelError::StartFailed(e.to_string()))?;

        *self.http.write().await = Some(Arc::clone(&client.http));
        *self.shard_manager.write().await = Some(Arc::clone(&client.shard_manager));

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!(error = %e, "discord client stopped with an error");
            }
        });

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let mut outbound_rx = bus.subscribe_channel("discord").await;
        let http = Arc::clone(self.http.read().await.as_ref().expect("http set above"));
        let max_len = self.config.max_message_length;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = outbound_rx.recv() => {
                        let Ok(raw_id) = msg.chat_id.parse::<u64>() else {
                            error!(chat_id = %msg.chat_id, "invalid discord channel ID");
                            continue;
                        };
                        let channel_id = ChannelId::new(raw_id);

                        for chunk in DiscordChannel::split_message(&msg.content, max_len) {
                            if let Err(e) = channel_id.say(&http, chunk).await {
                                error!(error = %e, "failed to send discord message");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Discord output handler shutting down");
                        break;
                    }
                }
            }
        });

        self.base.set_state(ChannelState::Running).await;
        info!("Discord channel started");

        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.base.set_state(ChannelState::Stopping).await;

        {
            let guard = self.shutdown_tx.write().await;
            if let Some(tx) = &*guard {
                let _ = tx.send(()).await;
            }
        }

        if let Some(shard_manager) = self.shard_manager.write().await.take() {
            shard_manager.shutdown_all().await;
        }
        *self.http.write().await = None;

        self.base.set_state(ChannelState::Stopped).await;
        info!("Discord channel stopped");

        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> ChannelResult<()> {
        let http = self.http.read().await;
        let http = http.as_ref().ok_or(ChannelError::NotConnected)?;

        let raw_id: u64 = msg
            .chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed("invalid channel ID".to_string()))?;
        let channel_id = ChannelId::new(raw_id);

        for chunk in Self::split_message(&msg.content, self.config.max_message_length) {
            channel_id
                .say(http, chunk)
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        }

        self.base.record_sent().await;
        Ok(())
    }

    async fn status(&self) -> ChannelStatus {
        self.base.build_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = DiscordChannelConfig::new("token123")
            .allow_user(12345)
            .allow_channel(67890);

        assert_eq!(config.token, "token123");
        assert!(config.is_user_allowed(12345));
        assert!(!config.is_user_allowed(99999));
        assert!(config.is_channel_allowed(67890));
    }

    #[test]
    fn test_split_message() {
        let short = "Hello, world!";
        let chunks = DiscordChannel::split_message(short, 100);
        assert_eq!(chunks.len(), 1);

        let long = "Line 1\nLine 2\nLine 3\nLine 4";
        let chunks = DiscordChannel::split_message(long, 15);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_empty_allowlist() {
        let config = DiscordChannelConfig::new("token");
        assert!(config.is_user_allowed(12345));
        assert!(config.is_channel_allowed(67890));
    }
}
