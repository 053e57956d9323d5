//! harvest - resilient batch acquisition from paginated upstream APIs
//!
//! Fetches upstream pages through the rate-limited caching client, resolves
//! entity identities and inspects payloads spilled by the bulk writer.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Resilient batch acquisition from paginated upstream APIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./harvest.toml or ~/.config/harvest/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Upstream requests per second
    #[arg(long, global = true)]
    rps: Option<f64>,

    /// Maximum retry attempts per upstream request
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every page of an upstream endpoint
    Fetch(cmd::fetch::FetchArgs),
    /// Resolve entity identities for a file of records
    Resolve(cmd::resolve::ResolveArgs),
    /// Inspect payloads spilled to fallback storage
    Fallback(cmd::fallback::FallbackArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    harvest_core::init_logging(cli.quiet, cli.debug);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // Precedence: CLI flags > environment > config file > defaults
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(rps) = cli.rps {
        config.client.requests_per_second = rps;
    }
    if let Some(n) = cli.max_retries {
        config.client.retry_attempts = n;
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Fetch(args) => cmd::fetch::run(args, &config),
        Command::Resolve(args) => cmd::resolve::run(args, &config),
        Command::Fallback(args) => cmd::fallback::run(args, &config),
        Command::Config => cmd::config::run(&config),
    }
}
