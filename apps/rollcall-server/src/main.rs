mod signals;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rollcall_db::MemoryBackend;
use rollcall_integration::telemetry::level_for_verbosity;
use rollcall_integration::{CoreConfig, HealthStatus};

/// Rollcall core host
#[derive(Debug, Parser)]
#[command(name = "rollcall-server")]
#[command(about = "Rollcall data-access and workflow orchestration core")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Commands {
    /// Start the core and wait for a shutdown signal
    Run,
    /// Validate configuration and exit
    Check,
    /// Start the core, print one health report, and exit
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config
        && !Path::new(path).is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    let mut config = CoreConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.logging.level = level_for_verbosity(cli.verbose, &config.logging.level);
    rollcall_integration::init_logging(&config.logging)?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Check => {
            tracing::info!("configuration is valid");
            println!("Configuration is valid");
            Ok(())
        }
        Commands::Health => health(config).await,
    }
}

async fn run(config: CoreConfig) -> Result<()> {
    let core = rollcall_integration::init(config, Arc::new(MemoryBackend::new()))?;
    tracing::info!(config = ?core.config(), "rollcall core running on the in-memory backend");

    signals::wait_for_shutdown().await?;

    if let Some(summary) = rollcall_integration::shutdown().await {
        tracing::info!(
            rolled_back = summary.rolled_back,
            unsubscribed = summary.unsubscribed,
            "rollcall core stopped"
        );
    }
    Ok(())
}

async fn health(config: CoreConfig) -> Result<()> {
    let core = rollcall_integration::init(config, Arc::new(MemoryBackend::new()))?;
    let report = core.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    rollcall_integration::shutdown().await;

    if report.status == HealthStatus::Error {
        anyhow::bail!("core is unhealthy");
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_subcommand() {
        let cli = Cli::try_parse_from([
            "rollcall-server",
            "--config",
            "rollcall.yaml",
            "-vv",
            "health",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("rollcall.yaml")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, Some(Commands::Health));
        assert!(!cli.print_config);
    }

    #[test]
    fn subcommand_is_optional() {
        let cli = Cli::try_parse_from(["rollcall-server", "--print-config"]).unwrap();
        assert_eq!(cli.command, None);
        assert!(cli.print_config);
    }
}
