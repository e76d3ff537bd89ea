//! Configuration Loader
//!
//! Loads and validates configuration from TOML files. Every section and
//! field is optional; missing values fall back to the defaults below.

use std::path::Path;
use std::time::Duration;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::application::SamplerTriggers;
use crate::domain::{
    Category, CorrelationConfig, SamplerConfig, ThresholdConfig, DEFAULT_DEDUP_LIMIT, DEFAULT_HISTORY_LIMIT,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerSection,
    pub correlation: CorrelationSection,
    pub thresholds: ThresholdsSection,
    pub sampler: SamplerSection,
    pub market_data: MarketDataSection,
    pub alerts: AlertsSection,
    pub logging: LoggingSection,
}

/// Ledger configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Facts kept per address (totals are never truncated)
    pub history_limit: usize,
    /// Recent (text, channel) keys remembered for duplicate detection
    pub dedup_limit: usize,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            dedup_limit: DEFAULT_DEDUP_LIMIT,
        }
    }
}

/// Correlation channel groups, as channel labels
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationSection {
    /// Fresh-launch channels
    pub primary: Vec<String>,
    /// Tracked-wallet channels
    pub secondary: Vec<String>,
}

impl Default for CorrelationSection {
    fn default() -> Self {
        let defaults = CorrelationConfig::default();
        Self {
            primary: defaults.primary.iter().map(|c| c.to_string()).collect(),
            secondary: defaults.secondary.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Threshold rule section (amounts in SOL, percentages as 0-100)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdsSection {
    pub large_buy: f64,
    pub fine_margin: f64,
    pub coarse_margin: f64,
    pub coarse_band_floor: f64,
    pub two_buys: f64,
    pub two_buys_margin: f64,
    pub ratio: f64,
    pub ratio_floor: f64,
    pub sell_offset: f64,
    pub sell_buy_floor: f64,
    pub sell_delta_pct: f64,
    /// Channels ignored by the large-buy rules
    pub excluded_categories: Vec<String>,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            large_buy: 10.0,
            fine_margin: 15.0,
            coarse_margin: 100.0,
            coarse_band_floor: 500.0,
            two_buys: 5.0,
            two_buys_margin: 10.0,
            ratio: 2.0,
            ratio_floor: 8.0,
            sell_offset: 10.0,
            sell_buy_floor: 10.0,
            sell_delta_pct: 20.0,
            excluded_categories: vec!["degen".to_string()],
        }
    }
}

/// Sampler section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerSection {
    /// Sleep before each baseline sample
    pub baseline_delays_secs: Vec<u64>,
    pub poll_interval_secs: u64,
    pub max_duration_secs: u64,
    pub dip_threshold_pct: f64,
    pub pump_threshold_pct: f64,
    pub surge_tiers_pct: Vec<f64>,
    pub retry_attempts: u32,
    pub retry_backoff_secs: u64,
    pub max_consecutive_failures: u32,
    /// Finished sessions block a restart for this long
    pub finished_retention_secs: u64,
    /// Start a sampler when an address correlates
    pub start_on_correlation: bool,
    /// Start a sampler on a large-buy alert
    pub start_on_large_buy: bool,
}

impl Default for SamplerSection {
    fn default() -> Self {
        Self {
            baseline_delays_secs: vec![5, 15, 25, 35],
            poll_interval_secs: 50,
            max_duration_secs: 30 * 60,
            dip_threshold_pct: 10.0,
            pump_threshold_pct: 10.0,
            surge_tiers_pct: vec![100.0, 200.0, 300.0],
            retry_attempts: 3,
            retry_backoff_secs: 5,
            max_consecutive_failures: 5,
            finished_retention_secs: 60 * 60,
            start_on_correlation: true,
            start_on_large_buy: true,
        }
    }
}

/// Market data API section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketDataSection {
    /// DexScreener-compatible API base URL
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for MarketDataSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.dexscreener.com/latest/dex".to_string(),
            timeout_secs: 10,
        }
    }
}

impl MarketDataSection {
    /// Get base URL with environment variable override
    /// Checks SWAPWATCH_MARKET_DATA_URL env var first, falls back to config value
    pub fn get_base_url(&self) -> String {
        std::env::var("SWAPWATCH_MARKET_DATA_URL").unwrap_or_else(|_| self.base_url.clone())
    }
}

/// Alert delivery section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    /// Post alerts to a Discord-style webhook
    pub webhook_enabled: bool,
    pub webhook_url: String,
    /// Display name for webhook messages
    pub username: String,
    /// Alerts buffered for delivery before new ones are dropped
    pub queue_size: usize,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            webhook_enabled: false,
            webhook_url: String::new(),
            username: "swapwatch".to_string(),
            queue_size: 256,
        }
    }
}

impl AlertsSection {
    /// Get webhook URL with environment variable override
    /// Checks SWAPWATCH_WEBHOOK_URL env var first, falls back to config value
    pub fn get_webhook_url(&self) -> Option<String> {
        std::env::var("SWAPWATCH_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .or_else(|| Some(self.webhook_url.clone()).filter(|url| !url.is_empty()))
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = shellexpand::tilde(&path.as_ref().to_string_lossy()).to_string();
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn check_finite(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{} must be a finite value >= 0, got {}",
            name, value
        )));
    }
    Ok(())
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "history_limit must be > 0".to_string(),
            ));
        }
        if self.ledger.dedup_limit == 0 {
            return Err(ConfigError::ValidationError(
                "dedup_limit must be > 0".to_string(),
            ));
        }

        // Correlation
        if self.correlation.primary.is_empty() || self.correlation.secondary.is_empty() {
            return Err(ConfigError::ValidationError(
                "correlation groups cannot be empty".to_string(),
            ));
        }
        let primary: Vec<Category> = self.correlation.primary.iter().map(|c| Category::parse(c)).collect();
        if let Some(shared) = self
            .correlation
            .secondary
            .iter()
            .map(|c| Category::parse(c))
            .find(|c| primary.contains(c))
        {
            return Err(ConfigError::ValidationError(format!(
                "category {} cannot be in both correlation groups",
                shared
            )));
        }

        // Thresholds
        let t = &self.thresholds;
        for (name, value) in [
            ("large_buy", t.large_buy),
            ("fine_margin", t.fine_margin),
            ("coarse_margin", t.coarse_margin),
            ("coarse_band_floor", t.coarse_band_floor),
            ("two_buys", t.two_buys),
            ("two_buys_margin", t.two_buys_margin),
            ("ratio", t.ratio),
            ("ratio_floor", t.ratio_floor),
            ("sell_offset", t.sell_offset),
            ("sell_buy_floor", t.sell_buy_floor),
            ("sell_delta_pct", t.sell_delta_pct),
        ] {
            check_finite(name, value)?;
        }
        if t.ratio <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "ratio must be > 0, got {}",
                t.ratio
            )));
        }

        // Sampler
        let s = &self.sampler;
        if s.baseline_delays_secs.is_empty() {
            return Err(ConfigError::ValidationError(
                "baseline_delays_secs cannot be empty".to_string(),
            ));
        }
        if s.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }
        if s.max_duration_secs == 0 {
            return Err(ConfigError::ValidationError(
                "max_duration_secs must be > 0".to_string(),
            ));
        }
        if s.dip_threshold_pct <= 0.0 || s.dip_threshold_pct >= 100.0 {
            return Err(ConfigError::ValidationError(format!(
                "dip_threshold_pct must be 0-100, got {}",
                s.dip_threshold_pct
            )));
        }
        check_finite("pump_threshold_pct", s.pump_threshold_pct)?;
        if s.pump_threshold_pct <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "pump_threshold_pct must be > 0, got {}",
                s.pump_threshold_pct
            )));
        }
        for tier in &s.surge_tiers_pct {
            check_finite("surge_tiers_pct", *tier)?;
        }
        if s.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry_attempts must be > 0".to_string(),
            ));
        }
        if s.max_consecutive_failures == 0 {
            return Err(ConfigError::ValidationError(
                "max_consecutive_failures must be > 0".to_string(),
            ));
        }

        // Market data
        if self.market_data.get_base_url().is_empty() {
            return Err(ConfigError::ValidationError(
                "market_data base_url cannot be empty".to_string(),
            ));
        }
        if self.market_data.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "market_data timeout_secs must be > 0".to_string(),
            ));
        }

        // Alerts
        if self.alerts.webhook_enabled && self.alerts.get_webhook_url().is_none() {
            return Err(ConfigError::ValidationError(
                "webhook_enabled requires webhook_url or SWAPWATCH_WEBHOOK_URL".to_string(),
            ));
        }
        if self.alerts.queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "queue_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sampler_triggers(&self) -> SamplerTriggers {
        SamplerTriggers {
            on_correlation: self.sampler.start_on_correlation,
            on_large_buy: self.sampler.start_on_large_buy,
        }
    }
}

impl From<&Config> for ThresholdConfig {
    fn from(config: &Config) -> Self {
        let t = &config.thresholds;
        ThresholdConfig {
            large_buy: decimal(t.large_buy),
            fine_margin: decimal(t.fine_margin),
            coarse_margin: decimal(t.coarse_margin),
            coarse_band_floor: decimal(t.coarse_band_floor),
            two_buys: decimal(t.two_buys),
            two_buys_margin: decimal(t.two_buys_margin),
            ratio: decimal(t.ratio),
            ratio_floor: decimal(t.ratio_floor),
            sell_offset: decimal(t.sell_offset),
            sell_buy_floor: decimal(t.sell_buy_floor),
            sell_delta_pct: decimal(t.sell_delta_pct),
            excluded_categories: t.excluded_categories.iter().map(|c| Category::parse(c)).collect(),
        }
    }
}

impl From<&Config> for SamplerConfig {
    fn from(config: &Config) -> Self {
        let s = &config.sampler;
        SamplerConfig {
            baseline_delays: s.baseline_delays_secs.iter().map(|secs| Duration::from_secs(*secs)).collect(),
            poll_interval: Duration::from_secs(s.poll_interval_secs),
            max_duration: Duration::from_secs(s.max_duration_secs),
            dip_threshold: decimal(s.dip_threshold_pct),
            pump_threshold: decimal(s.pump_threshold_pct),
            surge_tiers: s.surge_tiers_pct.iter().map(|t| decimal(*t)).collect(),
            retry_attempts: s.retry_attempts,
            retry_backoff: Duration::from_secs(s.retry_backoff_secs),
            max_consecutive_failures: s.max_consecutive_failures,
            finished_retention: Duration::from_secs(s.finished_retention_secs),
        }
    }
}

impl From<&Config> for CorrelationConfig {
    fn from(config: &Config) -> Self {
        CorrelationConfig {
            primary: config.correlation.primary.iter().map(|c| Category::parse(c)).collect(),
            secondary: config.correlation.secondary.iter().map(|c| Category::parse(c)).collect(),
        }
    }
}
