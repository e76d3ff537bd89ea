//! swapwatch - Swap feed watcher for Solana tokens
//!
//! Reads swap events, keeps per-token ledgers and emits alerts.

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use swapwatch::adapters::cli::{
    check_config_command, load_or_default, parse_command, run_command, CliApp, Command,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (webhook URL goes here, not in the config file)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    match app.command {
        Command::Run(cmd) => {
            let config = load_or_default(cmd.config.as_deref())?;
            init_logging(app.verbose, app.debug, &config.logging.level)?;
            run_command(cmd, config).await
        }
        Command::Parse(cmd) => {
            init_logging(app.verbose, app.debug, "warn")?;
            parse_command(cmd)
        }
        Command::CheckConfig(cmd) => {
            init_logging(app.verbose, app.debug, "warn")?;
            let config = load_or_default(cmd.config.as_deref())?;
            check_config_command(&config)
        }
    }
}

/// `--debug` and `--verbose` win over RUST_LOG, which wins over the configured level
fn init_logging(verbose: bool, debug: bool, configured: &str) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
    };

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    Ok(())
}
