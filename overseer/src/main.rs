//! Overseer CLI - agent runtime admin surface and server entry point.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use overseer::config::{self, BotConfig};
use overseer::domain::{Connector, Role};
use overseer::error::{Error, Result};
use overseer::gateway::GatewayBuilder;
use overseer::pairing;
use overseer::store::Store;
use overseer_core::model::AnthropicModel;

/// Overseer - agent runtime with multi-channel support
#[derive(Parser)]
#[command(name = "overseer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "OVERSEER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway: channels, MCP manager, scheduler, agent loop
    Serve(ServeArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Manage pairing tokens for new chat identities
    Pairing(PairingArgs),

    /// Manage scheduled/event-driven objectives
    Objectives(ObjectivesArgs),

    /// Manage workspaces
    Workspace(WorkspaceArgs),

    /// Inspect MCP server configuration and discovery state
    Mcp(McpArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Disable the CLI channel
    #[arg(long)]
    no_cli: bool,

    /// Disable the Telegram channel even if configured
    #[arg(long)]
    no_telegram: bool,

    /// Disable the Discord channel even if configured
    #[arg(long)]
    no_discord: bool,

    /// Model to use (overrides config)
    #[arg(short, long, env = "OVERSEER_MODEL")]
    model: Option<String>,

    /// Workspace slug to serve
    #[arg(short, long, default_value = "default")]
    workspace: String,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file if one does not already exist
    Init,
    /// Print the configuration file contents
    Show,
    /// Check that the configuration file parses and its policy is sane
    Validate,
}

#[derive(Args)]
struct PairingArgs {
    #[command(subcommand)]
    command: PairingCommands,
}

#[derive(Subcommand)]
enum PairingCommands {
    /// Mint a pairing token for a connector
    Create(PairingCreateArgs),
    /// List outstanding pairing requests
    List,
    /// Revoke a pairing request by ID
    Revoke(PairingRevokeArgs),
}

#[derive(Args)]
struct PairingCreateArgs {
    /// Connector the paired identity will arrive on (telegram, discord, cli, imap)
    connector: String,

    /// Workspace slug to grant access to
    #[arg(short, long, default_value = "default")]
    workspace: String,

    /// Role to grant (viewer, member, operator, admin, overlord)
    #[arg(short, long)]
    role: Option<String>,
}

#[derive(Args)]
struct PairingRevokeArgs {
    /// Pairing request ID to revoke
    id: String,
}

#[derive(Args)]
struct ObjectivesArgs {
    #[command(subcommand)]
    command: ObjectivesCommands,
}

#[derive(Subcommand)]
enum ObjectivesCommands {
    /// List objectives in a workspace
    List(ObjectivesListArgs),
    /// Pause an objective
    Pause(ObjectiveIdArgs),
    /// Resume a paused objective
    Resume(ObjectiveIdArgs),
}

#[derive(Args)]
struct ObjectivesListArgs {
    /// Workspace slug
    #[arg(short, long, default_value = "default")]
    workspace: String,
}

#[derive(Args)]
struct ObjectiveIdArgs {
    /// Objective ID
    id: String,
}

#[derive(Args)]
struct WorkspaceArgs {
    #[command(subcommand)]
    command: WorkspaceCommands,
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// Create a new workspace
    Create(WorkspaceCreateArgs),
    /// List all workspaces
    List,
}

#[derive(Args)]
struct WorkspaceCreateArgs {
    /// Workspace slug
    slug: String,

    /// Root path for the workspace's files (defaults under the configured workspace root)
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Args)]
struct McpArgs {
    #[command(subcommand)]
    command: McpCommands,
}

#[derive(Subcommand)]
enum McpCommands {
    /// Connect to every configured server once and print discovery state
    Status(McpStatusArgs),
}

#[derive(Args)]
struct McpStatusArgs {
    /// Workspace slug (workspace overrides layer over the base manifest)
    #[arg(short, long, default_value = "default")]
    workspace: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("overseer={level},overseer_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.unwrap_or_else(config::config_path);

    match cli.command {
        Commands::Serve(args) => cmd_serve(args, &config_file).await,
        Commands::Config(args) => cmd_config(args, &config_file).await,
        Commands::Pairing(args) => cmd_pairing(args, &config_file).await,
        Commands::Objectives(args) => cmd_objectives(args, &config_file).await,
        Commands::Workspace(args) => cmd_workspace(args, &config_file).await,
        Commands::Mcp(args) => cmd_mcp(args, &config_file).await,
    }
}

async fn cmd_serve(args: ServeArgs, config_file: &std::path::Path) -> Result<()> {
    tracing::info!("starting overseer gateway");

    let mut bot_config = config::load_config(config_file).await?;

    if let Some(model) = args.model {
        bot_config.agents.defaults.model = model;
    }
    if args.no_telegram {
        bot_config.channels.telegram.enabled = false;
    }
    if args.no_discord {
        bot_config.channels.discord.enabled = false;
    }

    let model = AnthropicModel::from_env(bot_config.agents.defaults.model.clone())
        .map_err(|e| Error::config(format!("failed to set up model: {e}")))?;

    let gateway = GatewayBuilder::new()
        .model(model)
        .bot_config(bot_config)
        .workspace_slug(args.workspace)
        .enable_cli(!args.no_cli)
        .build()
        .await?;
    let gateway = std::sync::Arc::new(gateway);

    println!("Gateway running. Press Ctrl+C to stop.\n");

    tokio::select! {
        result = gateway.clone().run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            Ok(())
        }
    }
}

async fn cmd_config(args: ConfigArgs, config_file: &std::path::Path) -> Result<()> {
    match args.command {
        ConfigCommands::Init => {
            if config_file.exists() {
                println!("Configuration already exists at: {}", config_file.display());
            } else {
                config::init_config(config_file).await?;
                println!("Configuration created: {}", config_file.display());
                println!();
                println!("Next steps:");
                println!("  1. export ANTHROPIC_API_KEY=<key>");
                println!("  2. overseer serve");
            }
        }
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(config_file)
                    .await
                    .map_err(|e| Error::config(format!("failed to read config: {e}")))?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'overseer config init' to create one.");
            }
        }
        ConfigCommands::Validate => {
            if !config_file.exists() {
                println!("error: configuration file does not exist at {}", config_file.display());
                return Ok(());
            }
            match config::load_config(config_file).await {
                Ok(cfg) => {
                    let policy: overseer::domain::Policy = (&cfg.policy).into();
                    if policy.max_loop_steps == 0 {
                        println!("error: policy.max_loop_steps must be greater than zero");
                    } else {
                        println!("Configuration is valid");
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
    }
    Ok(())
}

async fn cmd_pairing(args: PairingArgs, config_file: &std::path::Path) -> Result<()> {
    let bot_config = config::load_config(config_file).await?;
    let store = Store::open(&bot_config.database_path()).await?;

    match args.command {
        PairingCommands::Create(create_args) => {
            let connector = Connector::parse(&create_args.connector)
                .ok_or_else(|| Error::config(format!("unknown connector: {}", create_args.connector)))?;
            let workspace = store
                .get_workspace_by_slug(&create_args.workspace)
                .await?
                .ok_or_else(|| Error::config(format!("unknown workspace: {}", create_args.workspace)))?;
            let role = create_args
                .role
                .as_deref()
                .map(|r| Role::parse(r).ok_or_else(|| Error::config(format!("unknown role: {r}"))))
                .transpose()?;

            let token = pairing::create_pairing_token(&store, &bot_config.pairing, connector, &workspace.id, role).await?;

            println!("Pairing token: {}", token.token);
            println!("Hint:          {}", token.hint);
            println!("Expires in:    {}s", bot_config.pairing.token_ttl_secs);
        }
        PairingCommands::List => {
            let workspaces = store.list_workspaces().await?;
            let mut any = false;
            for workspace in workspaces {
                let requests = store.list_pending_pairing_requests().await?;
                for req in requests.into_iter().filter(|r| r.workspace_id == workspace.id) {
                    any = true;
                    println!(
                        "{}  connector={}  role={:?}  hint={}  workspace={}",
                        req.id, req.connector.as_str(), req.role, req.hint, workspace.slug
                    );
                }
            }
            if !any {
                println!("No pending pairing requests.");
            }
        }
        PairingCommands::Revoke(revoke_args) => {
            store.revoke_pairing_request(&revoke_args.id).await?;
            println!("Revoked pairing request {}", revoke_args.id);
        }
    }
    Ok(())
}

async fn cmd_objectives(args: ObjectivesArgs, config_file: &std::path::Path) -> Result<()> {
    let bot_config = config::load_config(config_file).await?;
    let store = Store::open(&bot_config.database_path()).await?;

    match args.command {
        ObjectivesCommands::List(list_args) => {
            let workspace = store
                .get_workspace_by_slug(&list_args.workspace)
                .await?
                .ok_or_else(|| Error::config(format!("unknown workspace: {}", list_args.workspace)))?;
            let objectives = store.list_objectives(&workspace.id).await?;
            if objectives.is_empty() {
                println!("No objectives in workspace '{}'.", list_args.workspace);
            }
            for objective in objectives {
                println!(
                    "{}  {:<8}  runs={} fail={} {}",
                    objective.id,
                    if objective.active { "active" } else { "paused" },
                    objective.run_count,
                    objective.consecutive_failures,
                    objective.title,
                );
            }
        }
        ObjectivesCommands::Pause(id_args) => {
            store.set_objective_active(&id_args.id, false).await?;
            println!("Paused objective {}", id_args.id);
        }
        ObjectivesCommands::Resume(id_args) => {
            store.set_objective_active(&id_args.id, true).await?;
            println!("Resumed objective {}", id_args.id);
        }
    }
    Ok(())
}

async fn cmd_mcp(args: McpArgs, config_file: &std::path::Path) -> Result<()> {
    let bot_config = config::load_config(config_file).await?;
    let store = Store::open(&bot_config.database_path()).await?;

    match args.command {
        McpCommands::Status(status_args) => {
            let workspace = store
                .get_workspace_by_slug(&status_args.workspace)
                .await?
                .ok_or_else(|| Error::config(format!("unknown workspace: {}", status_args.workspace)))?;

            let manifest_path = bot_config.mcp.manifest_path();
            let manifest = overseer::mcp_manager::load_manifest(&manifest_path).await?;

            let overrides_path = std::path::PathBuf::from(&workspace.root_path)
                .join("context")
                .join("mcp")
                .join("servers.json");
            let overrides = overseer::mcp_manager::load_workspace_overrides(&overrides_path).await?;

            let merged = overseer::mcp_manager::merge_workspace_overrides(&manifest.servers, &overrides);
            if merged.is_empty() {
                println!("No MCP servers configured ({})", manifest_path.display());
                return Ok(());
            }

            let registry = std::sync::Arc::new(overseer::tools::ToolRegistry::new());
            let manager = overseer::mcp_manager::McpManager::new(registry);
            manager.bootstrap(&merged).await;

            for state in manager.server_states().await {
                let status = if state.healthy { "healthy" } else { "unhealthy" };
                println!(
                    "{}  {status}  tools={} resources={} templates={} prompts={}{}",
                    state.id,
                    state.tool_names.len(),
                    state.resource_names.len(),
                    state.resource_template_names.len(),
                    state.prompt_names.len(),
                    state.last_error.map(|e| format!("  error={e}")).unwrap_or_default(),
                );
            }
        }
    }
    Ok(())
}

async fn cmd_workspace(args: WorkspaceArgs, config_file: &std::path::Path) -> Result<()> {
    let bot_config = config::load_config(config_file).await?;
    let store = Store::open(&bot_config.database_path()).await?;

    match args.command {
        WorkspaceCommands::Create(create_args) => {
            let root = create_args
                .root
                .unwrap_or_else(|| bot_config.workspace_root().join(&create_args.slug));
            tokio::fs::create_dir_all(&root)
                .await
                .map_err(|e| Error::config(format!("failed to create workspace root: {e}")))?;
            let workspace = store.create_workspace(&create_args.slug, &root.to_string_lossy()).await?;
            println!("Created workspace '{}' at {}", workspace.slug, workspace.root_path);
        }
        WorkspaceCommands::List => {
            let workspaces = store.list_workspaces().await?;
            if workspaces.is_empty() {
                println!("No workspaces.");
            }
            for workspace in workspaces {
                println!("{}  {}  {}", workspace.id, workspace.slug, workspace.root_path);
            }
        }
    }
    Ok(())
}
