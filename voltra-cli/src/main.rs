//! Command-line entry point: `standalone` runs the worker inline, `daemon`
//! runs the supervising parent which forks worker children.

mod supervisor;
mod worker;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "voltra", about = "Options volatility trading engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading worker in this process.
    Standalone {
        /// Named configuration layer (config/{env}.toml).
        #[arg(long)]
        env: Option<String>,
    },
    /// Run the supervising parent which owns a worker child process.
    Daemon {
        #[arg(long)]
        env: Option<String>,
    },
    /// Internal: the forked worker child.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        env: Option<String>,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Standalone { env } | Command::Worker { env } => {
            let config = voltra_config::load_config(env.as_deref())?;
            init_tracing(&config.log_level);
            worker::run(config).await
        }
        Command::Daemon { env } => {
            let config = voltra_config::load_config(env.as_deref())?;
            init_tracing(&config.log_level);
            supervisor::run(config, env).await
        }
    }
}
