//! Maestro orchestrator service.
//!
//! Boots the agent execution engine behind an authenticated HTTP API:
//! loads configuration, takes the process lock, wires the model
//! provider, tool registry, task manager and notification sinks, then
//! serves until shutdown.

#![allow(clippy::print_stdout)] // CLI output is intentional

mod api;
mod audit;
mod config;
mod error;
mod lock;
mod sink;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use maestro::agent::RuntimeConfig;
use maestro::manager::{ManagerConfig, OverflowPolicy, TaskFilter, TaskManager, TaskStatus};
use maestro::providers::HttpProvider;
use maestro::router::{ModelConfig, ModelTier, default_tiers};
use maestro::tool::{FsListTool, FsReadTool, FsWriteTool, HttpTool, ShellTool, ToolRegistry};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// Maestro - voice-driven autonomous agent orchestrator
#[derive(Parser)]
#[command(name = "maestro")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "MAESTRO_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator service
    Serve,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging from verbosity flags and `LOG_LEVEL`.
fn init_logging(verbosity: u8) {
    let level = match std::env::var("LOG_LEVEL").as_deref() {
        Ok("DEBUG") => Level::DEBUG,
        Ok("WARN") => Level::WARN,
        Ok("ERROR") => Level::ERROR,
        Ok("INFO") => Level::INFO,
        _ => match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        },
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("maestro={level},maestro_server={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve => serve(cli.config).await,
        Commands::Config { command } => cmd_config(command, cli.config).await,
    }
}

/// Start the service.
async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = config::load_config(config_path.as_deref()).await?;

    // Single-instance guard; released on shutdown.
    let _lock = lock::ProcessLock::acquire(std::path::Path::new("."))?;

    let manager = build_manager(&config);
    register_sinks(&config, &manager).await;

    let state = Arc::new(api::AppState::new(
        manager.clone(),
        config.api.api_key.clone(),
        config.users.allowed_user_ids.clone(),
        Duration::from_millis(config.users.min_message_interval_ms),
        "transport".to_owned(),
    ));
    let app = api::router(state);

    let addr: SocketAddr = config
        .api
        .bind_addr
        .parse()
        .map_err(|_| ServerError::config("unparseable bind_addr"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!(%addr, "maestro listening");
    println!("maestro listening on {addr} (press Ctrl+C to stop)");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(manager))
    .await?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C, then cancel running tasks before the server stops.
async fn shutdown_signal(manager: TaskManager) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested, cancelling running tasks");

    let filter = TaskFilter {
        status: Some(TaskStatus::Running),
        ..TaskFilter::default()
    };
    let (running, _) = manager.list(&filter).await;
    for task in running {
        manager.cancel(task.id).await;
    }
    // Give agents a moment to observe the cancel and finalize.
    tokio::time::sleep(Duration::from_millis(500)).await;
}

/// Build the task manager from configuration.
fn build_manager(config: &ServerConfig) -> TaskManager {
    let provider = Arc::new(HttpProvider::new(
        config.provider.base_url.clone(),
        config.provider.api_key.clone(),
    ));

    let working_dir = PathBuf::from(&config.agents.working_dir);
    let mut registry = ToolRegistry::new();
    registry.register(ShellTool::new(working_dir.clone()));
    registry.register(FsReadTool::new(working_dir.clone()));
    registry.register(FsWriteTool::new(working_dir.clone()));
    registry.register(FsListTool::new(working_dir.clone()));
    registry.register(HttpTool::default());

    let manager_config = ManagerConfig {
        max_concurrent_agents: config.agents.max_concurrent,
        overflow: match config.agents.overflow {
            config::OverflowSetting::Queue => OverflowPolicy::Queue,
            config::OverflowSetting::Reject => OverflowPolicy::Reject,
        },
        runtime: RuntimeConfig {
            working_dir,
            ..RuntimeConfig::default()
        },
        tiers: build_tiers(config),
    };

    TaskManager::new(manager_config, provider, Arc::new(registry))
}

/// Tier configurations, with configured model ids substituted. With
/// smart switching disabled every tier points at the balanced model.
fn build_tiers(config: &ServerConfig) -> Vec<ModelConfig> {
    let mut tiers = default_tiers();
    for tier in &mut tiers {
        let configured = match tier.tier {
            ModelTier::Fast => config.provider.fast_model.as_ref(),
            ModelTier::Balanced => config.provider.balanced_model.as_ref(),
            ModelTier::Powerful => config.provider.powerful_model.as_ref(),
        };
        if let Some(id) = configured {
            tier.id.clone_from(id);
        }
    }
    if !config.agents.smart_model_switching {
        let balanced_id = tiers
            .iter()
            .find(|t| t.tier == ModelTier::Balanced)
            .map(|t| t.id.clone());
        if let Some(id) = balanced_id {
            for tier in &mut tiers {
                tier.id.clone_from(&id);
            }
        }
    }
    tiers
}

/// Register the transport sink: webhook or log, with the audit trail
/// fanned in when enabled.
async fn register_sinks(config: &ServerConfig, manager: &TaskManager) {
    let primary: Arc<dyn maestro::manager::NotificationSink> =
        match &config.notifications.webhook_url {
            Some(url) => Arc::new(sink::WebhookSink::new(
                url.clone(),
                config.notifications.targets.clone(),
            )),
            None => Arc::new(sink::LogSink),
        };

    let transport: Arc<dyn maestro::manager::NotificationSink> = if config.audit.enabled {
        let trail = Arc::new(audit::AuditSink::new(
            PathBuf::from(&config.audit.dir),
            manager.clone(),
        ));
        Arc::new(sink::FanoutSink::new(vec![primary, trail]))
    } else {
        primary
    };

    manager.register_sink("transport", transport).await;
}

/// Configuration management commands.
async fn cmd_config(command: ConfigCommands, config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(config::config_path);
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            if path.exists() {
                let content = tokio::fs::read_to_string(&path).await?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist: {}", path.display());
            }
        }
        ConfigCommands::Validate => match config::load_config(Some(&path)).await {
            Ok(_) => println!("Configuration is valid"),
            Err(e) => {
                println!("error: {e}");
                return Err(e);
            }
        },
    }
    Ok(())
}
