//! Threshold Alert Engine
//!
//! Fixed rule set evaluated over an immutable [`LedgerSnapshot`]:
//!
//! 1. Large single buy
//! 2. Large buys from two distinct channels
//! 3. Buy pressure (buy/sell ratio)
//! 4. Sell pressure (sells above buys plus an offset)
//!
//! Each rule fires at most once per evaluation and leaves an [`AlertMark`]
//! behind. A rule only fires again once the ledger has moved past its mark
//! by the rule's hysteresis margin, or crossed into a new severity tier.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::alerts::{AlertKind, AlertMark, AlertPayload};
use super::ledger::LedgerSnapshot;
use super::types::{Category, Direction, TransactionFact};

/// Rule thresholds and hysteresis margins (SOL unless noted)
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    /// Minimum single buy for the large-buy rule
    pub large_buy: Decimal,
    /// Cumulative buy growth needed to re-alert below the coarse band
    pub fine_margin: Decimal,
    /// Cumulative buy growth needed to re-alert inside the coarse band
    pub coarse_margin: Decimal,
    /// Cumulative buys at which the coarse band starts
    pub coarse_band_floor: Decimal,
    /// Minimum per-channel buy for the two-channel rule
    pub two_buys: Decimal,
    /// Combined growth needed to re-alert the same channel pair
    pub two_buys_margin: Decimal,
    /// Minimum buys/sells ratio
    pub ratio: Decimal,
    /// Both totals must reach this before the ratio counts
    pub ratio_floor: Decimal,
    pub sell_offset: Decimal,
    pub sell_buy_floor: Decimal,
    /// Percentage-point move needed to re-alert sell pressure
    pub sell_delta_pct: Decimal,
    /// Channels ignored by the large-buy rules
    pub excluded_categories: Vec<Category>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            large_buy: dec!(10),
            fine_margin: dec!(15),
            coarse_margin: dec!(100),
            coarse_band_floor: dec!(500),
            two_buys: dec!(5),
            two_buys_margin: dec!(10),
            ratio: dec!(2),
            ratio_floor: dec!(8),
            sell_offset: dec!(10),
            sell_buy_floor: dec!(10),
            sell_delta_pct: dec!(20),
            excluded_categories: vec![Category::Degen],
        }
    }
}

/// Number of recent raw texts attached to pressure alerts
const CONTEXT_TEXTS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct ThresholdAlertEngine {
    config: ThresholdConfig,
}

impl ThresholdAlertEngine {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Run every rule against one snapshot, updating marks for rules that fire
    pub fn evaluate(
        &self,
        snapshot: &LedgerSnapshot,
        marks: &mut HashMap<AlertKind, AlertMark>,
    ) -> Vec<AlertPayload> {
        [
            self.check_large_buy(snapshot, marks),
            self.check_two_large_buys(snapshot, marks),
            self.check_buy_pressure(snapshot, marks),
            self.check_sell_pressure(snapshot, marks),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn is_excluded(&self, category: &Category) -> bool {
        self.config.excluded_categories.contains(category)
    }

    /// Largest buy per channel, excluded channels dropped, strongest first
    fn ranked_buys<'a>(&self, snapshot: &'a LedgerSnapshot, minimum: Decimal) -> Vec<&'a TransactionFact> {
        let mut ranked: Vec<&TransactionFact> = snapshot
            .largest_buys
            .iter()
            .filter(|(category, fact)| !self.is_excluded(category) && fact.amount >= minimum)
            .map(|(_, fact)| fact)
            .collect();
        // BTreeMap iteration already follows category order, so a stable
        // sort leaves ties in that order
        ranked.sort_by(|a, b| b.amount.cmp(&a.amount));
        ranked
    }

    fn check_large_buy(
        &self,
        snapshot: &LedgerSnapshot,
        marks: &mut HashMap<AlertKind, AlertMark>,
    ) -> Option<AlertPayload> {
        let largest = *self.ranked_buys(snapshot, self.config.large_buy).first()?;
        let total_buys = snapshot.total_buys;
        let coarse = total_buys >= self.config.coarse_band_floor;

        let should_alert = match marks.get(&AlertKind::LargeBuy) {
            None => true,
            Some(AlertMark::LargeBuy { total_buys: marked, coarse: marked_coarse }) => {
                let margin = if coarse {
                    self.config.coarse_margin
                } else {
                    self.config.fine_margin
                };
                (coarse && !marked_coarse) || total_buys.saturating_sub(*marked) >= margin
            }
            Some(_) => true,
        };
        if !should_alert {
            return None;
        }

        marks.insert(AlertKind::LargeBuy, AlertMark::LargeBuy { total_buys, coarse });

        Some(
            AlertPayload::new(AlertKind::LargeBuy, snapshot.address.clone())
                .with_category(largest.category.clone())
                .with_amount("largest_buy", largest.amount)
                .with_amount("total_buys", total_buys)
                .with_raw_text(largest.raw_text.clone()),
        )
    }

    fn check_two_large_buys(
        &self,
        snapshot: &LedgerSnapshot,
        marks: &mut HashMap<AlertKind, AlertMark>,
    ) -> Option<AlertPayload> {
        let ranked = self.ranked_buys(snapshot, self.config.two_buys);
        let (first, second) = match ranked.as_slice() {
            [first, second, ..] => (*first, *second),
            _ => return None,
        };

        let combined = first.amount.checked_add(second.amount)?;
        let pair = if first.category <= second.category {
            (first.category.clone(), second.category.clone())
        } else {
            (second.category.clone(), first.category.clone())
        };

        let should_alert = match marks.get(&AlertKind::TwoLargeBuys) {
            None => true,
            Some(AlertMark::TwoLargeBuys { pair: marked_pair, combined: marked }) => {
                *marked_pair != pair || combined.saturating_sub(*marked) >= self.config.two_buys_margin
            }
            Some(_) => true,
        };
        if !should_alert {
            return None;
        }

        marks.insert(AlertKind::TwoLargeBuys, AlertMark::TwoLargeBuys { pair, combined });

        Some(
            AlertPayload::new(AlertKind::TwoLargeBuys, snapshot.address.clone())
                .with_category(first.category.clone())
                .with_category(second.category.clone())
                .with_amount(first.category.as_str(), first.amount)
                .with_amount(second.category.as_str(), second.amount)
                .with_amount("combined", combined)
                .with_raw_text(first.raw_text.clone())
                .with_raw_text(second.raw_text.clone()),
        )
    }

    fn check_buy_pressure(
        &self,
        snapshot: &LedgerSnapshot,
        marks: &mut HashMap<AlertKind, AlertMark>,
    ) -> Option<AlertPayload> {
        let buys = snapshot.total_buys;
        let sells = snapshot.total_sells;
        if buys <= self.config.ratio_floor || sells <= self.config.ratio_floor {
            return None;
        }
        let ratio = buys.checked_div(sells)?;
        if ratio < self.config.ratio {
            return None;
        }

        let should_alert = match marks.get(&AlertKind::BuyPressure) {
            None => true,
            Some(AlertMark::BuyPressure { buys: marked_buys, sells: marked_sells }) => {
                let doubled = |marked: &Decimal, now: Decimal| marked.checked_mul(dec!(2)).map_or(false, |d| now >= d);
                doubled(marked_buys, buys) && doubled(marked_sells, sells)
            }
            Some(_) => true,
        };
        if !should_alert {
            return None;
        }

        marks.insert(AlertKind::BuyPressure, AlertMark::BuyPressure { buys, sells });

        let mut payload = AlertPayload::new(AlertKind::BuyPressure, snapshot.address.clone())
            .with_amount("total_buys", buys)
            .with_amount("total_sells", sells)
            .with_amount("ratio", ratio.round_dp(2));
        for category in snapshot.buy_totals().into_keys() {
            payload = payload.with_category(category);
        }
        for text in snapshot.recent_texts(Direction::Buy, CONTEXT_TEXTS) {
            payload = payload.with_raw_text(text);
        }
        Some(payload)
    }

    fn check_sell_pressure(
        &self,
        snapshot: &LedgerSnapshot,
        marks: &mut HashMap<AlertKind, AlertMark>,
    ) -> Option<AlertPayload> {
        let buys = snapshot.total_buys;
        let sells = snapshot.total_sells;
        let threshold = buys.checked_add(self.config.sell_offset)?;
        if sells <= threshold || buys <= self.config.sell_buy_floor || threshold <= Decimal::ZERO {
            return None;
        }
        let pct = (sells - threshold).checked_div(threshold)?.saturating_mul(dec!(100));

        let should_alert = match marks.get(&AlertKind::SellPressure) {
            None => true,
            Some(AlertMark::SellPressure { pct: marked }) => {
                (pct - *marked).abs() >= self.config.sell_delta_pct
            }
            Some(_) => true,
        };
        if !should_alert {
            return None;
        }

        marks.insert(AlertKind::SellPressure, AlertMark::SellPressure { pct });

        let mut payload = AlertPayload::new(AlertKind::SellPressure, snapshot.address.clone())
            .with_amount("total_buys", buys)
            .with_amount("total_sells", sells)
            .with_amount("threshold", threshold)
            .with_percentage("over_threshold", pct);
        for text in snapshot.recent_texts(Direction::Sell, CONTEXT_TEXTS) {
            payload = payload.with_raw_text(text);
        }
        Some(payload)
    }
}
