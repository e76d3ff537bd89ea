//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - DexScreener: market data over HTTP
//! - Webhook: Discord-style alert delivery, plus a log-only sink
//! - JSON Lines: event source over a file or stdin
//! - CLI: Command-line interface handlers

pub mod cli;
pub mod dexscreener;
pub mod jsonl_source;
pub mod webhook;

pub use cli::CliApp;
pub use dexscreener::{DexScreenerClient, DEXSCREENER_API};
pub use jsonl_source::JsonLinesEventSource;
pub use webhook::{discord_message, LogAlertSink, WebhookAlertSink};
