//! Gradebox CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "gradebox")]
#[command(about = "Gradebox grading runner", long_about = None)]
struct Cli {
    /// Path to the configuration file; defaults plus environment when unset
    #[arg(long, short, env = "GRADEBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the task queue and grade submissions until interrupted
    Runner,
    /// Rebuild the course and store fresh baselines, then exit
    Upgrade,
    /// Apply database migrations
    Migrate,
    /// Validate the configuration and print the effective settings
    CheckConfig,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = commands::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Runner => commands::runner::run(&config).await?,
        Commands::Upgrade => commands::runner::upgrade(&config).await?,
        Commands::Migrate => commands::migrate(&config).await?,
        Commands::CheckConfig => commands::check_config(&config),
    }

    Ok(())
}
