//! Correlation Engine
//!
//! Tracks which channels have reported each address and detects the first
//! time an address shows up in both a primary channel (fresh launches) and a
//! secondary channel (tracked wallets).
//!
//! Marking an address as correlated is a single insert into a locked set, so
//! across any interleaving of callers exactly one `check_correlation` call
//! returns `Some` for a given address.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use super::types::{Address, Category};

/// Channel groups that define a correlation
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationConfig {
    pub primary: Vec<Category>,
    pub secondary: Vec<Category>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            primary: vec![Category::Fresh, Category::Fresh1h, Category::Fresh5Sol1mMc],
            secondary: vec![
                Category::Legend,
                Category::KolAlpha,
                Category::KolRegular,
                Category::Whale,
                Category::Smart,
                Category::Challenge,
                Category::HighFreq,
                Category::Degen,
                Category::Insider,
            ],
        }
    }
}

#[derive(Debug, Default)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
    membership: RwLock<HashMap<Category, HashSet<Address>>>,
    correlated: Mutex<HashSet<Address>>,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            membership: RwLock::new(HashMap::new()),
            correlated: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Record that `category` reported `address`
    pub fn observe(&self, address: &Address, category: &Category) {
        let mut membership = self.membership.write();
        membership
            .entry(category.clone())
            .or_default()
            .insert(address.clone());
    }

    pub fn is_member(&self, address: &Address, category: &Category) -> bool {
        self.membership
            .read()
            .get(category)
            .map_or(false, |members| members.contains(address))
    }

    fn first_match(&self, address: &Address, group: &[Category]) -> Option<Category> {
        let membership = self.membership.read();
        group
            .iter()
            .find(|c| membership.get(*c).map_or(false, |m| m.contains(address)))
            .cloned()
    }

    /// First primary and first secondary channel for a newly correlated
    /// address; `None` if not correlated or already reported
    pub fn check_correlation(&self, address: &Address) -> Option<(Category, Category)> {
        let primary = self.first_match(address, &self.config.primary)?;
        let secondary = self.first_match(address, &self.config.secondary)?;

        if self.correlated.lock().insert(address.clone()) {
            Some((primary, secondary))
        } else {
            None
        }
    }

    /// Every secondary channel the address belongs to, in configured order
    pub fn secondary_matches(&self, address: &Address) -> Vec<Category> {
        let membership = self.membership.read();
        self.config
            .secondary
            .iter()
            .filter(|c| membership.get(*c).map_or(false, |m| m.contains(address)))
            .cloned()
            .collect()
    }

    pub fn is_correlated(&self, address: &Address) -> bool {
        self.correlated.lock().contains(address)
    }

    /// Drop all membership and correlation state for an address
    pub fn forget(&self, address: &Address) {
        {
            let mut membership = self.membership.write();
            for members in membership.values_mut() {
                members.remove(address);
            }
            membership.retain(|_, members| !members.is_empty());
        }
        self.correlated.lock().remove(address);
    }
}
