//! CLI Command Handlers
//!
//! Implementation of all CLI commands for swapwatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::adapters::{DexScreenerClient, JsonLinesEventSource, LogAlertSink, WebhookAlertSink};
use crate::application::{EventPipeline, PipelineReport, SamplerScheduler};
use crate::config::{load_config, Config};
use crate::domain::{
    AmountExtractor, CorrelationConfig, CorrelationEngine, LedgerRegistry, SamplerConfig,
    ThresholdAlertEngine, ThresholdConfig,
};
use crate::ports::AlertSink;

/// Config file used when `--config` is not given and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "config/swapwatch.toml";

/// swapwatch - Swap feed watcher for Solana tokens
#[derive(Parser, Debug)]
#[command(
    name = "swapwatch",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Swap feed watcher for Solana tokens",
    long_about = "swapwatch reads swap reports from tracked channels, keeps per-token buy/sell \
                  ledgers, alerts on cross-channel correlation and large flows, and samples \
                  market cap for qualifying tokens to catch dips, revivals and surges."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume events and emit alerts
    Run(RunCmd),

    /// Show what the extractor makes of one swap text
    Parse(ParseCmd),

    /// Load and validate a configuration file
    CheckConfig(CheckConfigCmd),
}

impl Command {
    pub fn config_path(&self) -> Option<&Path> {
        match self {
            Command::Run(cmd) => cmd.config.as_deref(),
            Command::CheckConfig(cmd) => cmd.config.as_deref(),
            Command::Parse(_) => None,
        }
    }
}

/// Consume events
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// JSON Lines event file, or - for stdin
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    pub events: PathBuf,

    /// Log alerts instead of posting them to the webhook
    #[arg(long)]
    pub dry_run: bool,

    /// Exit when the event source ends instead of waiting for samplers
    #[arg(long)]
    pub no_wait: bool,
}

/// Parse one swap text
#[derive(Parser, Debug)]
pub struct ParseCmd {
    /// Swap description, e.g. "wallet swapped 15 SOL for TOKEN"
    #[arg(value_name = "TEXT")]
    pub text: String,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckConfigCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Load the given config, the default file if present, or built-in defaults
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH)),
        None => {
            let config = Config::default();
            config.validate().context("Invalid built-in configuration")?;
            Ok(config)
        }
    }
}

pub async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    tracing::info!("Starting swapwatch...");

    let mut webhook_task = None;
    let sink: Arc<dyn AlertSink> = match config.alerts.get_webhook_url() {
        Some(url) if config.alerts.webhook_enabled && !cmd.dry_run => {
            let (sink, handle) = WebhookAlertSink::spawn(
                url,
                config.alerts.username.clone(),
                config.alerts.queue_size,
                Duration::from_secs(config.market_data.timeout_secs),
            )
            .context("Failed to create webhook client")?;
            webhook_task = Some(handle);
            Arc::new(sink)
        }
        _ => {
            if cmd.dry_run {
                tracing::warn!("DRY RUN - alerts are logged, not delivered");
            }
            Arc::new(LogAlertSink)
        }
    };

    let market_data = DexScreenerClient::new(
        config.market_data.get_base_url(),
        Duration::from_secs(config.market_data.timeout_secs),
    )
    .context("Failed to create market data client")?;

    let scheduler = SamplerScheduler::new(
        SamplerConfig::from(&config),
        Arc::new(market_data),
        Arc::clone(&sink),
    );
    let pipeline = EventPipeline::new(
        LedgerRegistry::new(config.ledger.history_limit).with_dedup_limit(config.ledger.dedup_limit),
        CorrelationEngine::new(CorrelationConfig::from(&config)),
        ThresholdAlertEngine::new(ThresholdConfig::from(&config)),
        scheduler,
        sink,
    )
    .with_triggers(config.sampler_triggers());

    let mut source = JsonLinesEventSource::open(&cmd.events)
        .await
        .with_context(|| format!("Failed to open event source {}", cmd.events.display()))?;

    // Setup Ctrl+C handler
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    let report = pipeline.run(&mut source, shutdown.clone()).await;

    if !cmd.no_wait {
        wait_for_samplers(&pipeline, &shutdown).await;
    }
    pipeline.shutdown().await;

    // Dropping the pipeline releases the last webhook sender
    drop(pipeline);
    if let Some(handle) = webhook_task {
        if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
            tracing::warn!("Timed out flushing queued alerts");
        }
    }

    print_report(&report);
    tracing::info!("swapwatch stopped");
    Ok(())
}

async fn wait_for_samplers(pipeline: &EventPipeline, shutdown: &CancellationToken) {
    let active = pipeline.scheduler().active_count();
    if active == 0 || shutdown.is_cancelled() {
        return;
    }
    tracing::info!("Waiting for {} active sampler(s), Ctrl+C to stop", active);

    while pipeline.scheduler().active_count() > 0 {
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

fn print_report(report: &PipelineReport) {
    println!("Events:     {}", report.events);
    println!("Applied:    {}", report.applied);
    println!("Dropped:    {}", report.dropped);
    println!("Rejected:   {}", report.rejected);
    println!("Duplicates: {}", report.duplicates);
    println!("Alerts:     {}", report.alerts);
    println!("Samplers:   {}", report.samplers_started);
    if report.poll_errors > 0 {
        println!("Poll errors: {}", report.poll_errors);
    }
}

pub fn parse_command(cmd: ParseCmd) -> Result<()> {
    match AmountExtractor::new().try_extract(&cmd.text) {
        Ok((amount, direction)) => println!("{} {} SOL", direction, amount),
        Err(e) => println!("No fact: {}", e),
    }
    Ok(())
}

pub fn check_config_command(config: &Config) -> Result<()> {
    let thresholds = ThresholdConfig::from(config);
    let sampler = SamplerConfig::from(config);
    let correlation = CorrelationConfig::from(config);

    println!("Configuration OK");
    println!(
        "  correlation: primary [{}] / secondary [{}]",
        join(&correlation.primary),
        join(&correlation.secondary)
    );
    println!(
        "  thresholds:  large buy {} SOL, two buys {} SOL, ratio {}x, sell offset {} SOL",
        thresholds.large_buy, thresholds.two_buys, thresholds.ratio, thresholds.sell_offset
    );
    println!(
        "  sampler:     {} baseline samples, poll {:?}, lifetime {:?}, dip {}%, pump {}%",
        sampler.baseline_delays.len(),
        sampler.poll_interval,
        sampler.max_duration,
        sampler.dip_threshold,
        sampler.pump_threshold
    );
    println!("  market data: {}", config.market_data.get_base_url());
    println!(
        "  alerts:      {}",
        if config.alerts.webhook_enabled { "webhook" } else { "log only" }
    );
    Ok(())
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}
