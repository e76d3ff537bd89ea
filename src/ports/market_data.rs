//! Market data port
//!
//! Lookup of the external valuation signal the sampler re-measures.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Address;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status} for {address}")]
    Status { status: u16, address: String },

    #[error("No market data for {0}")]
    NotFound(String),

    #[error("Data parsing error: {0}")]
    Parse(String),

    #[error("Request timed out")]
    Timeout,
}

/// One market reading for an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_cap: Decimal,
    /// Trailing short-window volume
    pub volume: Decimal,
    pub liquidity: Decimal,
}

impl MarketSnapshot {
    pub fn with_market_cap(market_cap: Decimal) -> Self {
        Self {
            market_cap,
            volume: Decimal::ZERO,
            liquidity: Decimal::ZERO,
        }
    }

    /// A zero market cap is treated as no reading
    pub fn is_valid(&self) -> bool {
        self.market_cap > Decimal::ZERO
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn snapshot(&self, address: &Address) -> Result<MarketSnapshot, MarketDataError>;
}
