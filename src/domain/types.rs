//! Core value types
//!
//! Address keys, channel categories and the immutable per-event values that
//! flow through the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifiers that channels emit in place of a real token address
const PLACEHOLDER_ADDRESSES: &[&str] = &[
    "so11111111111111111111111111111111111111112", // wrapped SOL
    "[wallet]",
    "[neo]",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address is empty after normalization")]
    Empty,

    #[error("Address contains invalid character {ch:?}: {raw}")]
    InvalidCharacter { raw: String, ch: char },

    #[error("Address is a placeholder, not a token: {0}")]
    Placeholder(String),
}

/// Normalized token address
///
/// Normalization trims whitespace, strips backticks and lowercases, so the
/// same token reported by different channels lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Normalize and validate a raw address string
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '`')
            .collect::<String>()
            .trim()
            .to_lowercase();

        if normalized.is_empty() {
            return Err(AddressError::Empty);
        }

        if PLACEHOLDER_ADDRESSES.contains(&normalized.as_str()) {
            return Err(AddressError::Placeholder(raw.trim().to_string()));
        }

        if let Some(ch) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(AddressError::InvalidCharacter {
                raw: raw.to_string(),
                ch,
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Channel category an event was reported by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Legend,
    KolAlpha,
    KolRegular,
    Whale,
    Smart,
    Challenge,
    HighFreq,
    Degen,
    Insider,
    Fresh,
    Fresh1h,
    Fresh5Sol1mMc,
    Other(String),
}

impl Category {
    /// Parse a channel label (case-insensitive, spaces/underscores as dashes)
    pub fn parse(label: &str) -> Self {
        let slug = label
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");

        match slug.as_str() {
            "legend" | "legend-alpha" => Category::Legend,
            "kol-alpha" => Category::KolAlpha,
            "kol-regular" => Category::KolRegular,
            "whale" => Category::Whale,
            "smart" => Category::Smart,
            "challenge" => Category::Challenge,
            "high-freq" => Category::HighFreq,
            "degen" => Category::Degen,
            "insider" => Category::Insider,
            "fresh" => Category::Fresh,
            "fresh-1h" => Category::Fresh1h,
            "fresh-5sol-1m-mc" => Category::Fresh5Sol1mMc,
            _ => Category::Other(slug),
        }
    }

    /// Canonical slug
    pub fn as_str(&self) -> &str {
        match self {
            Category::Legend => "legend",
            Category::KolAlpha => "kol-alpha",
            Category::KolRegular => "kol-regular",
            Category::Whale => "whale",
            Category::Smart => "smart",
            Category::Challenge => "challenge",
            Category::HighFreq => "high-freq",
            Category::Degen => "degen",
            Category::Insider => "insider",
            Category::Fresh => "fresh",
            Category::Fresh1h => "fresh-1h",
            Category::Fresh5Sol1mMc => "fresh-5sol-1m-mc",
            Category::Other(slug) => slug,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Category {
    fn from(label: String) -> Self {
        Category::parse(&label)
    }
}

impl From<&str> for Category {
    fn from(label: &str) -> Self {
        Category::parse(label)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

/// Swap direction relative to SOL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// SOL spent on the token
    Buy,
    /// Token sold for SOL
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Raw event as delivered by an event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Channel label, e.g. "Whale" or "Fresh 1h"
    pub category: String,
    /// Token address as reported (not yet normalized)
    pub address: String,
    /// Free-text swap description
    pub raw_text: String,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(category: impl Into<String>, address: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            address: address.into(),
            raw_text: raw_text.into(),
            observed_at: Utc::now(),
        }
    }
}

/// One parsed swap, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionFact {
    pub address: Address,
    pub category: Category,
    pub amount: Decimal,
    pub direction: Direction,
    pub raw_text: String,
    pub observed_at: DateTime<Utc>,
}

impl TransactionFact {
    pub fn is_buy(&self) -> bool {
        self.direction == Direction::Buy
    }
}
