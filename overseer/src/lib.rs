//! Overseer - an automation runtime that lets an LLM agent carry out
//! objectives across chat connectors, with policy-gated tool use and
//! human-approved side effects.
//!
//! # Architecture
//!
//! - **Message Bus** ([`bus`]) - Async pub-sub for channel-agent communication
//! - **Channels** ([`channels`]) - Platform integrations (CLI, Telegram, Discord)
//! - **Agent** ([`agent`]) - LLM-powered turn loop
//! - **Tool Registry** ([`tools`]) - Namespaced, hot-swappable tool catalog
//! - **MCP Manager** ([`mcp_manager`]) - Model Context Protocol server bridging
//! - **Executors** ([`executors`]) - Plugins that carry out approved actions
//! - **Objectives** ([`objectives`]) - Scheduled and event-driven task creation
//! - **Store** ([`store`]) - SQLite-backed persistence for all of the above
//! - **Gateway** ([`gateway`]) - Unified orchestration of all components
//!
//! # Features
//!
//! - `telegram` - Enable Telegram channel support via teloxide
//! - `discord` - Enable Discord channel support via serenity

pub mod agent;
pub mod approvals;
pub mod audit;
pub mod bus;
pub mod channel;
pub mod channels;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod executors;
pub mod gateway;
pub mod mcp_manager;
pub mod objectives;
pub mod pairing;
pub mod store;
pub mod tools;
pub mod util;

/// Convenient re-exports of the most commonly used types.
pub mod prelude {
    pub use crate::error::{
        AgentError, AgentResult, BusError, BusResult, ChannelError, ChannelResult, ConfigError,
        ConfigResult, Error, ErrorContext, ErrorKind, Result, StorageError, StorageResult,
    };

    pub use crate::agent::{AgentLoop, ExecuteContext, ExecuteInput, ExecuteOutcome};

    pub use crate::bus::{InboundHandle, MessageBus, MessageBusBuilder, OutboundHandle};

    pub use crate::channel::{
        AllowlistConfig, BoxedChannel, Channel, ChannelBase, ChannelManager, ChannelState,
        ChannelStatus,
    };
    pub use crate::channels::CliChannel;
    #[cfg(feature = "telegram")]
    pub use crate::channels::TelegramChannel;
    #[cfg(feature = "discord")]
    pub use crate::channels::DiscordChannel;

    pub use crate::config::{
        AgentsConfig, BotConfig, ChannelsConfig, ExecConfig, McpConfig, PairingConfig,
        PolicyConfig, ToolPoliciesConfig, ToolPolicy, config_path, init_config, load_config,
        save_config,
    };

    pub use crate::domain::{
        ActionApproval, ApprovalStatus, Connector, Context, ExecutionStatus, Identity, Objective,
        PairingRequest, Policy, Role, Task, TaskStatus, ToolCallRecord, ToolCallStatus,
        TraceEntry, User, Workspace,
    };

    pub use crate::events::{
        InboundMessage, MediaAttachment, MediaType, MessageFormat, OutboundMessage,
    };

    pub use crate::executors::{ExecutorContext, ExecutorPlugin, ExecutorRegistry};

    pub use crate::gateway::{Gateway, GatewayBuilder, GatewayConfig, GatewayStatus};

    pub use crate::store::Store;

    pub use crate::tools::{ToolMeta, ToolRegistry};

    pub use crate::util::{
        config_dir, config_path as util_config_path, generate_id, generate_message_id, home_dir,
        split_into_chunks, timestamp_ms, timestamp_secs, truncate_str, workspace_dir,
    };
}
