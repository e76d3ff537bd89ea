//! DexScreener market data client
//!
//! Looks up the market cap, 5 minute volume and liquidity of a token through
//! the public pair search endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::Address;
use crate::ports::{MarketDataError, MarketDataProvider, MarketSnapshot};

pub const DEXSCREENER_API: &str = "https://api.dexscreener.com/latest/dex";

#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    http: Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn search_url(&self, address: &Address) -> String {
        format!("{}/search?q={}", self.base_url, address)
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerClient {
    async fn snapshot(&self, address: &Address) -> Result<MarketSnapshot, MarketDataError> {
        let response = self
            .http
            .get(self.search_url(address))
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Status {
                status: status.as_u16(),
                address: address.to_string(),
            });
        }

        let body: SearchResponse = response.json().await.map_err(|e| MarketDataError::Parse(e.to_string()))?;
        snapshot_from_response(body, address)
    }
}

fn map_reqwest(e: reqwest::Error) -> MarketDataError {
    if e.is_timeout() {
        MarketDataError::Timeout
    } else {
        MarketDataError::Http(e.to_string())
    }
}

/// Pick the pair for `address` (or the first pair) and read its figures
fn snapshot_from_response(body: SearchResponse, address: &Address) -> Result<MarketSnapshot, MarketDataError> {
    let mut pairs = body.pairs.unwrap_or_default();
    let index = pairs
        .iter()
        .position(|p| {
            p.base_token
                .as_ref()
                .map_or(false, |t| t.address.eq_ignore_ascii_case(address.as_str()))
        })
        .unwrap_or(0);
    if pairs.is_empty() {
        return Err(MarketDataError::NotFound(address.to_string()));
    }
    let pair = pairs.swap_remove(index);

    let market_cap = pair.market_cap.or(pair.fdv).unwrap_or(0.0);
    let volume = pair.volume.and_then(|v| v.m5).unwrap_or(0.0);
    let liquidity = pair.liquidity.and_then(|l| l.usd).unwrap_or(0.0);

    Ok(MarketSnapshot {
        market_cap: to_decimal(market_cap)?,
        volume: to_decimal(volume)?,
        liquidity: to_decimal(liquidity)?,
    })
}

fn to_decimal(value: f64) -> Result<Decimal, MarketDataError> {
    Decimal::from_f64(value).ok_or_else(|| MarketDataError::Parse(format!("Not a finite number: {}", value)))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    base_token: Option<BaseToken>,
    fdv: Option<f64>,
    market_cap: Option<f64>,
    volume: Option<Volume>,
    liquidity: Option<Liquidity>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    address: String,
}

#[derive(Debug, Deserialize)]
struct Volume {
    m5: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Liquidity {
    usd: Option<f64>,
}
