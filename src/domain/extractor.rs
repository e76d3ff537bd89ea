//! Amount Extractor
//!
//! Turns a free-text swap description into an `(amount, direction)` fact.
//!
//! Grammar (case-insensitive, only considered when the text contains the
//! word `swapped`):
//!
//! ```text
//! Buy:  swapped <amount> SOL for <anything>
//! Sell: swapped <anything> for <amount> SOL
//! ```
//!
//! The Buy pattern is evaluated first. Text that satisfies both patterns is
//! ambiguous and produces no fact. `<amount>` may use `,` digit grouping,
//! which is stripped before parsing. `<anything>` may span lines. Amounts
//! above [`MAX_AMOUNT`] are rejected.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use super::types::Direction;

static SWAPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bswapped\b").expect("valid regex"));

static BUY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bswapped\s+([0-9][0-9,]*(?:\.[0-9]+)?|\.[0-9]+)\s+sol\s+for\b")
        .expect("valid regex")
});

static SELL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bswapped\s+\S.*?\s+for\s+([0-9][0-9,]*(?:\.[0-9]+)?|\.[0-9]+)\s+sol\b")
        .expect("valid regex")
});

/// Largest amount accepted, in SOL
pub const MAX_AMOUNT: Decimal = dec!(1000000000);

/// Why a text produced no fact
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Text does not describe a swap")]
    NotASwap,

    #[error("Swap text matches neither the buy nor the sell pattern")]
    NoPattern,

    #[error("Swap text matches both buy and sell patterns")]
    Ambiguous,

    #[error("Invalid amount token: {0}")]
    InvalidAmount(String),
}

/// Stateless parser for swap descriptions
#[derive(Debug, Clone, Copy, Default)]
pub struct AmountExtractor;

impl AmountExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a fact, or `None` if the text is outside the grammar
    pub fn extract(&self, text: &str) -> Option<(Decimal, Direction)> {
        self.try_extract(text).ok()
    }

    /// Extract a fact, reporting why extraction failed
    pub fn try_extract(&self, text: &str) -> Result<(Decimal, Direction), ExtractError> {
        if !SWAPPED.is_match(text) {
            return Err(ExtractError::NotASwap);
        }

        let buy = BUY_PATTERN.captures(text).and_then(|c| c.get(1));
        let sell = SELL_PATTERN.captures(text).and_then(|c| c.get(1));

        match (buy, sell) {
            (Some(amount), None) => Ok((parse_amount(amount.as_str())?, Direction::Buy)),
            (None, Some(amount)) => Ok((parse_amount(amount.as_str())?, Direction::Sell)),
            (Some(_), Some(_)) => Err(ExtractError::Ambiguous),
            (None, None) => Err(ExtractError::NoPattern),
        }
    }
}

/// Parse a grouped amount token such as `1,234.5`
fn parse_amount(token: &str) -> Result<Decimal, ExtractError> {
    let mut cleaned: String = token.chars().filter(|c| *c != ',').collect();
    if cleaned.starts_with('.') {
        cleaned.insert(0, '0');
    }
    Decimal::from_str(&cleaned)
        .ok()
        .filter(|amount| *amount <= MAX_AMOUNT)
        .map(|amount| amount.normalize())
        .ok_or_else(|| ExtractError::InvalidAmount(token.to_string()))
}
