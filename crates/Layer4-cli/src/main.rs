//! crew CLI - Main entry point

mod cli;
mod render;
mod services;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// crew - disposable container sandboxes worked by LLM agent teams
#[derive(Parser, Debug)]
#[command(name = "crew")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: cli::Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// State directory (workspaces.json, projects.json, ...)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Operation id; repeating a side-effecting command with the same id
    /// replays its result instead of running it again
    #[arg(long, global = true)]
    op_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = crew_foundation::CrewConfig::load()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }

    let services = services::Services::open(config)?;
    cli::run(args.command, &services, args.op_id.as_deref()).await
}
