use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "finetune-controller")]
#[command(version, about = "Reconciles FinetuneExperiments into owned FinetuneJobs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format: pretty or json. Overrides controller.toml.
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Path to controller.toml. Defaults to ./controller.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load experiment manifests into an in-memory store and run the controller
    Run {
        /// Directory containing *.json, *.yaml or *.yml experiment manifests
        #[arg(short, long)]
        manifests: PathBuf,
        /// Stop once every experiment has converged and print the result as JSON
        #[arg(long)]
        once: bool,
        /// Upper bound on the --once wait
        #[arg(long, default_value = "30")]
        max_wait_secs: u64,
        /// Overrides controller.max_concurrent_reconciles
        #[arg(long)]
        max_concurrent_reconciles: Option<usize>,
    },
    /// View and manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default controller.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            manifests,
            once,
            max_wait_secs,
            max_concurrent_reconciles,
        } => {
            let args = cmd::RunArgs {
                manifests: manifests.clone(),
                once: *once,
                max_wait: std::time::Duration::from_secs(*max_wait_secs),
                max_concurrent_reconciles: *max_concurrent_reconciles,
            };
            cmd::cmd_run(&cli, args).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
