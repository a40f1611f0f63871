//! leasehold - exercise and inspect connection pool configurations

mod logging;
mod simulated;
mod soak;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use leasehold_pool::PoolConfig;

use crate::simulated::SimulatedBackend;
use crate::soak::SoakOptions;

/// leasehold - bounded connection pool toolkit
#[derive(Parser, Debug)]
#[command(name = "leasehold")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pool configuration file (TOML)
    #[arg(long, global = true, env = "LEASEHOLD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LEASEHOLD_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a pool with concurrent workers against a simulated backend
    Soak(SoakArgs),

    /// Print the effective pool configuration
    Config,
}

#[derive(Args, Debug)]
pub struct SoakArgs {
    /// Number of concurrent workers
    #[arg(short, long, default_value = "8")]
    pub workers: usize,

    /// Queries issued by each worker
    #[arg(short, long, default_value = "100")]
    pub queries: usize,

    /// Simulated time to open a connection
    #[arg(long, default_value = "20")]
    pub connect_latency_ms: u64,

    /// Simulated time per query
    #[arg(long, default_value = "5")]
    pub query_latency_ms: u64,

    /// Probability that a query leaves its connection broken
    #[arg(long, default_value = "0.0")]
    pub break_rate: f64,

    /// Probability that opening a connection fails
    #[arg(long, default_value = "0.0")]
    pub connect_failure_rate: f64,
}

impl SoakArgs {
    fn options(&self) -> SoakOptions {
        SoakOptions {
            workers: self.workers,
            queries_per_worker: self.queries,
            backend: SimulatedBackend {
                connect_latency: Duration::from_millis(self.connect_latency_ms),
                op_latency: Duration::from_millis(self.query_latency_ms),
                break_rate: self.break_rate,
                connect_failure_rate: self.connect_failure_rate,
            },
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PoolConfig> {
    let config = match path {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("loading pool config from {}", path.display()))?,
        None => PoolConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(
        logging::LoggingConfig::default()
            .with_verbosity(cli.verbose)
            .with_json(cli.log_json),
    )?;

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(?config, "pool configuration loaded");

    match cli.command {
        Commands::Soak(args) => {
            let summary = soak::run(config, args.options()).await?;
            match cli.format {
                OutputFormat::Text => println!("{}", soak::render(&summary)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
            if summary.succeeded == 0 && summary.failed() > 0 {
                anyhow::bail!("every query failed");
            }
        }
        Commands::Config => match cli.format {
            OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        },
    }

    Ok(())
}
