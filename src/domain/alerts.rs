//! Alert payloads and hysteresis marks

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Address, Category};

/// Every alert the system can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LargeBuy,
    TwoLargeBuys,
    BuyPressure,
    SellPressure,
    Correlation,
    SamplerDip,
    SamplerRevival,
    MarketCapSurge,
}

impl AlertKind {
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::LargeBuy => "Large Buy",
            AlertKind::TwoLargeBuys => "Large Buys Across Channels",
            AlertKind::BuyPressure => "Buy Pressure",
            AlertKind::SellPressure => "Sell Pressure",
            AlertKind::Correlation => "Channel Correlation",
            AlertKind::SamplerDip => "Market Cap Dip",
            AlertKind::SamplerRevival => "Token Revival",
            AlertKind::MarketCapSurge => "Market Cap Surge",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Alert handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub kind: AlertKind,
    pub address: Address,
    /// Categories that contributed to the alert
    pub category_context: Vec<Category>,
    pub amounts: BTreeMap<String, Decimal>,
    pub percentages: BTreeMap<String, Decimal>,
    pub raw_texts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
    pub fn new(kind: AlertKind, address: Address) -> Self {
        Self {
            kind,
            address,
            category_context: Vec::new(),
            amounts: BTreeMap::new(),
            percentages: BTreeMap::new(),
            raw_texts: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        if !self.category_context.contains(&category) {
            self.category_context.push(category);
        }
        self
    }

    pub fn with_amount(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.amounts.insert(name.into(), value);
        self
    }

    pub fn with_percentage(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.percentages.insert(name.into(), value.round_dp(2));
        self
    }

    pub fn with_raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_texts.push(text.into());
        self
    }

    pub fn amount(&self, name: &str) -> Option<Decimal> {
        self.amounts.get(name).copied()
    }

    pub fn percentage(&self, name: &str) -> Option<Decimal> {
        self.percentages.get(name).copied()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("[{}] {}", self.kind.title(), self.address)];
        if !self.category_context.is_empty() {
            let cats: Vec<&str> = self.category_context.iter().map(|c| c.as_str()).collect();
            parts.push(cats.join(","));
        }
        for (name, value) in &self.amounts {
            parts.push(format!("{}={}", name, value));
        }
        for (name, value) in &self.percentages {
            parts.push(format!("{}={}%", name, value));
        }
        parts.join(" ")
    }
}

/// State recorded when a rule last fired for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertMark {
    LargeBuy {
        total_buys: Decimal,
        coarse: bool,
    },
    TwoLargeBuys {
        pair: (Category, Category),
        combined: Decimal,
    },
    BuyPressure {
        buys: Decimal,
        sells: Decimal,
    },
    SellPressure {
        pct: Decimal,
    },
}
