mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pipeline_engine::{EngineConfig, ServiceBuilder};

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Run and inspect pipeline-engine plans", version)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log engine activity at debug level
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a plan file without running it
    Validate(commands::validate::ValidateArgs),

    /// Execute a plan and stream its progress
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "pipeline_engine=debug,info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let builder = ServiceBuilder::new().with_config(config);

    match cli.command {
        Command::Validate(args) => commands::validate::execute(args, builder).await,
        Command::Run(args) => commands::run::execute(args, builder).await,
    }
}
