//! # gs-cli
//!
//! `goalsync`: a terminal client for the goal sync engine.
//!
//! - `goalsync goals list [--stale]` — fetch (or show cached) goals
//! - `goalsync goals show <slug>` — one goal in detail
//! - `goalsync goals refresh <slug>` — re-fetch a single goal
//! - `goalsync goals add <slug> <urtext> [--wait]` — add a datapoint
//! - `goalsync goals watch` — fetch, then follow reconciliation to the end
//! - `goalsync signout` — forget the cached goals

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// goalsync: keep a local view of your goals in step with the server.
#[derive(Parser)]
#[command(name = "goalsync", version, about)]
struct Cli {
    /// Directory holding config.toml and the goal snapshot
    /// (defaults to the platform config dir).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Username, overriding the config file.
    #[arg(long, env = "GOALSYNC_USERNAME", global = true)]
    username: Option<String>,

    /// Personal access token, overriding the config file.
    #[arg(long, env = "GOALSYNC_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List, inspect and update goals.
    Goals {
        #[command(subcommand)]
        command: commands::goals::GoalsCommands,
    },
    /// Sign out and discard the cached goals.
    Signout,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't mix with command output on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gs_sync=info".parse()?)
                .add_directive("gs_remote=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => commands::default_config_dir()?,
    };
    let ctx = commands::Context::open(&config_dir, cli.username, cli.token)?;

    match &cli.command {
        Commands::Goals { command } => commands::goals::execute(command, &ctx).await,
        Commands::Signout => commands::session::sign_out(&ctx),
    }
}
