//! swapwatch - Swap feed watcher library
//!
//! Turns free-text swap reports from categorized channels into per-token
//! ledgers and alerts, and samples market cap for tokens worth watching.
//!
//! # Modules
//!
//! - `domain`: Core logic (extractor, ledger, correlation, thresholds, sampler)
//! - `ports`: Trait abstractions (EventSource, MarketDataProvider, AlertSink)
//! - `adapters`: External implementations (DexScreener, webhook, JSON Lines, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Event pipeline and sampler scheduler

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
