//! Address Ledger
//!
//! Per-address running totals, split by category and direction, with a
//! bounded transaction history and the hysteresis marks left behind by the
//! threshold rules.
//!
//! Key properties:
//! - Totals reconcile exactly with the recorded facts (Decimal arithmetic)
//! - The same `(raw_text, category)` pair is counted once within the
//!   dedup window (the most recent `dedup_limit` keys)
//! - A fact that would overflow a total is rejected and changes nothing
//! - One writer per address: the registry hands out an address-scoped lock,
//!   and rule evaluation reads an immutable [`LedgerSnapshot`] taken under it

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::alerts::{AlertKind, AlertMark};
use super::types::{Address, AddressError, Category, Direction, TransactionFact};

/// Default number of facts kept per address
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// Default number of dedup keys remembered per address
pub const DEFAULT_DEDUP_LIMIT: usize = 4096;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Fact for {fact} applied to ledger of {ledger}")]
    AddressMismatch { ledger: Address, fact: Address },

    #[error("Amount {amount} overflows the running totals of {address}")]
    AmountOverflow { address: Address, amount: Decimal },
}

/// Running totals for one category
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryTotals {
    pub buy_total: Decimal,
    pub sell_total: Decimal,
    pub buy_count: u32,
    pub sell_count: u32,
}

/// Result of applying a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Recorded,
    /// Same raw text was already recorded for this category
    Duplicate,
}

/// Per-address aggregation state
#[derive(Debug, Clone)]
pub struct AddressLedger {
    address: Address,
    per_category: HashMap<Category, CategoryTotals>,
    /// Largest buy fact per category, kept outside the bounded history so
    /// eviction never changes what the large-buy rules can see
    largest_buys: HashMap<Category, TransactionFact>,
    history: VecDeque<TransactionFact>,
    history_limit: usize,
    total_buys: Decimal,
    total_sells: Decimal,
    seen: HashSet<(String, Category)>,
    /// Insertion order of `seen`, oldest first
    seen_order: VecDeque<(String, Category)>,
    dedup_limit: usize,
    alert_marks: HashMap<AlertKind, AlertMark>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl AddressLedger {
    pub fn new(address: Address, history_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            address,
            per_category: HashMap::new(),
            largest_buys: HashMap::new(),
            history: VecDeque::with_capacity(history_limit.min(64)),
            history_limit: history_limit.max(1),
            total_buys: Decimal::ZERO,
            total_sells: Decimal::ZERO,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            dedup_limit: DEFAULT_DEDUP_LIMIT,
            alert_marks: HashMap::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Builder method to set how many dedup keys are remembered
    pub fn with_dedup_limit(mut self, dedup_limit: usize) -> Self {
        self.dedup_limit = dedup_limit.max(1);
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Record a fact
    pub fn apply(&mut self, fact: TransactionFact) -> Result<ApplyOutcome, LedgerError> {
        if fact.address != self.address {
            return Err(LedgerError::AddressMismatch {
                ledger: self.address.clone(),
                fact: fact.address,
            });
        }

        let key = (fact.raw_text.clone(), fact.category.clone());
        if self.seen.contains(&key) {
            return Ok(ApplyOutcome::Duplicate);
        }

        // Compute every new total before touching state
        let current = self.per_category.get(&fact.category).cloned().unwrap_or_default();
        let overflow = || LedgerError::AmountOverflow {
            address: self.address.clone(),
            amount: fact.amount,
        };
        let (category_total, grand_total) = match fact.direction {
            Direction::Buy => (current.buy_total, self.total_buys),
            Direction::Sell => (current.sell_total, self.total_sells),
        };
        let category_total = category_total.checked_add(fact.amount).ok_or_else(overflow)?;
        let grand_total = grand_total.checked_add(fact.amount).ok_or_else(overflow)?;

        let totals = self.per_category.entry(fact.category.clone()).or_default();
        match fact.direction {
            Direction::Buy => {
                totals.buy_total = category_total;
                totals.buy_count += 1;
                self.total_buys = grand_total;

                let replace = self
                    .largest_buys
                    .get(&fact.category)
                    .map_or(true, |current| fact.amount > current.amount);
                if replace {
                    self.largest_buys.insert(fact.category.clone(), fact.clone());
                }
            }
            Direction::Sell => {
                totals.sell_total = category_total;
                totals.sell_count += 1;
                self.total_sells = grand_total;
            }
        }

        self.remember(key);

        if fact.observed_at > self.last_seen {
            self.last_seen = fact.observed_at;
        }
        if fact.observed_at < self.first_seen {
            self.first_seen = fact.observed_at;
        }

        self.history.push_back(fact);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }

        Ok(ApplyOutcome::Recorded)
    }

    fn remember(&mut self, key: (String, Category)) {
        self.seen.insert(key.clone());
        self.seen_order.push_back(key);
        while self.seen_order.len() > self.dedup_limit {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }

    pub fn totals(&self, category: &Category) -> Option<&CategoryTotals> {
        self.per_category.get(category)
    }

    pub fn total_buys(&self) -> Decimal {
        self.total_buys
    }

    pub fn total_sells(&self) -> Decimal {
        self.total_sells
    }

    /// Dedup keys currently remembered
    pub fn dedup_len(&self) -> usize {
        self.seen.len()
    }

    /// Recorded facts, oldest first
    pub fn history(&self) -> impl Iterator<Item = &TransactionFact> {
        self.history.iter()
    }

    pub fn alert_marks_mut(&mut self) -> &mut HashMap<AlertKind, AlertMark> {
        &mut self.alert_marks
    }

    /// Immutable view used for rule evaluation
    pub fn snapshot(&self) -> LedgerSnapshot {
        let per_category: BTreeMap<Category, CategoryTotals> = self
            .per_category
            .iter()
            .map(|(c, t)| (c.clone(), t.clone()))
            .collect();
        let largest_buys: BTreeMap<Category, TransactionFact> = self
            .largest_buys
            .iter()
            .map(|(c, f)| (c.clone(), f.clone()))
            .collect();

        LedgerSnapshot {
            address: self.address.clone(),
            total_buys: self.total_buys(),
            total_sells: self.total_sells(),
            per_category,
            largest_buys,
            recent: self.history.iter().rev().take(SNAPSHOT_RECENT).cloned().collect(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }

    /// Counts, totals and rates for display
    pub fn stats(&self, now: DateTime<Utc>) -> LedgerStats {
        let buy_count: u32 = self.per_category.values().map(|t| t.buy_count).sum();
        let sell_count: u32 = self.per_category.values().map(|t| t.sell_count).sum();
        let tracked_secs = (now - self.first_seen).num_seconds().max(0);
        let hours = tracked_secs as f64 / 3600.0;

        let (buy_rate_per_hour, sell_rate_per_hour) = if hours > 0.0 {
            (buy_count as f64 / hours, sell_count as f64 / hours)
        } else {
            (0.0, 0.0)
        };

        LedgerStats {
            address: self.address.clone(),
            buy_count,
            sell_count,
            total_buys: self.total_buys(),
            total_sells: self.total_sells(),
            tracked_secs,
            buy_rate_per_hour,
            sell_rate_per_hour,
        }
    }
}

/// Number of most recent facts carried in a snapshot
const SNAPSHOT_RECENT: usize = 10;

/// Point-in-time copy of a ledger
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub address: Address,
    pub total_buys: Decimal,
    pub total_sells: Decimal,
    pub per_category: BTreeMap<Category, CategoryTotals>,
    pub largest_buys: BTreeMap<Category, TransactionFact>,
    /// Most recent facts, newest first
    pub recent: Vec<TransactionFact>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl LedgerSnapshot {
    /// Buy totals per category, skipping empty ones
    pub fn buy_totals(&self) -> BTreeMap<Category, Decimal> {
        self.per_category
            .iter()
            .filter(|(_, t)| !t.buy_total.is_zero())
            .map(|(c, t)| (c.clone(), t.buy_total))
            .collect()
    }

    /// Raw text of the newest facts in one direction
    pub fn recent_texts(&self, direction: Direction, limit: usize) -> Vec<String> {
        self.recent
            .iter()
            .filter(|f| f.direction == direction)
            .take(limit)
            .map(|f| f.raw_text.clone())
            .collect()
    }
}

/// Summary counters for one tracked address
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub address: Address,
    pub buy_count: u32,
    pub sell_count: u32,
    pub total_buys: Decimal,
    pub total_sells: Decimal,
    pub tracked_secs: i64,
    pub buy_rate_per_hour: f64,
    pub sell_rate_per_hour: f64,
}

/// Shared handle to one address ledger
pub type LedgerHandle = Arc<Mutex<AddressLedger>>;

/// Registry of all address ledgers
///
/// Lookups go through a sharded map; mutation of a ledger happens under its
/// own lock, so work on different addresses never contends.
#[derive(Debug)]
pub struct LedgerRegistry {
    ledgers: DashMap<Address, LedgerHandle>,
    history_limit: usize,
    dedup_limit: usize,
}

impl Default for LedgerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl LedgerRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            ledgers: DashMap::new(),
            history_limit,
            dedup_limit: DEFAULT_DEDUP_LIMIT,
        }
    }

    /// Builder method to set the per-address dedup window
    pub fn with_dedup_limit(mut self, dedup_limit: usize) -> Self {
        self.dedup_limit = dedup_limit;
        self
    }

    /// Ledger for an address, created on first use
    pub fn ledger(&self, address: &Address) -> LedgerHandle {
        if let Some(existing) = self.ledgers.get(address) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .ledgers
            .entry(address.clone())
            .or_insert_with(|| {
                let ledger = AddressLedger::new(address.clone(), self.history_limit).with_dedup_limit(self.dedup_limit);
                Arc::new(Mutex::new(ledger))
            });
        Arc::clone(entry.value())
    }

    pub fn get(&self, address: &Address) -> Option<LedgerHandle> {
        self.ledgers.get(address).map(|e| Arc::clone(e.value()))
    }

    /// Apply a fact to its address ledger
    pub fn apply(&self, fact: TransactionFact) -> Result<ApplyOutcome, LedgerError> {
        let handle = self.ledger(&fact.address);
        let mut ledger = handle.lock();
        ledger.apply(fact)
    }

    pub fn snapshot(&self, address: &Address) -> Option<LedgerSnapshot> {
        self.get(address).map(|h| h.lock().snapshot())
    }

    pub fn remove(&self, address: &Address) -> bool {
        self.ledgers.remove(address).is_some()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.ledgers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}
