//! stackpilot CLI - sequence deployments of the compose-managed stack.

mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stackpilot_orchestrator::{OrchestratorResult, RunOptions, StackConfig, Strategy};

#[derive(Parser)]
#[command(name = "stackpilot")]
#[command(about = "Sequence deployments of the compose-managed web stack")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to stackpilot.toml in the current
    /// directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Confirm destructive steps without prompting
    #[arg(long, global = true)]
    yes: bool,

    /// Proceed with a destructive step even if the pre-step snapshot fails
    #[arg(long, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full redeploy: stop, rebuild and start everything in dependency order
    Deploy,

    /// Rebuild and restart the app tier one service at a time
    RollingUpdate,

    /// Rebuild and restart the app tier, skipping migrations and static
    /// collection
    QuickUpdate,

    /// Destroy and recreate the database (a snapshot is taken first)
    ResetDatabase,

    /// Take a snapshot of the database and asset directories
    Backup,

    /// Delete snapshots past their retention expiry
    Prune,

    /// Show per-service container status
    Status,

    /// Issue a TLS certificate and switch the proxy to the TLS variant
    InitSsl,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    let options = RunOptions {
        assume_yes: cli.yes,
        force: cli.force,
    };

    let result = match cli.command {
        Commands::Deploy => commands::run::run(config, Strategy::Deploy, options).await,
        Commands::RollingUpdate => {
            commands::run::run(config, Strategy::RollingUpdate, options).await
        }
        Commands::QuickUpdate => commands::run::run(config, Strategy::QuickUpdate, options).await,
        Commands::ResetDatabase => {
            commands::run::run(config, Strategy::ResetDatabase, options).await
        }
        Commands::Backup => commands::run::run(config, Strategy::Backup, options).await,
        Commands::Prune => commands::prune::run(config).await,
        Commands::Status => commands::status::run(config).await,
        Commands::InitSsl => commands::init_ssl::run(config).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(if e.is_validation() { 2 } else { 1 })
        }
    }
}

fn load_config(path: Option<&Path>) -> OrchestratorResult<StackConfig> {
    match path {
        Some(path) => StackConfig::from_file(path),
        None => StackConfig::load(),
    }
}
