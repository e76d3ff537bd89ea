//! Market cap sampler state machine
//!
//! One monitoring session per address:
//!
//! ```text
//! Sampling --baseline--> Armed <--> Dipped --pump--> Revived
//!     |                    |           |
//!     +--------------------+-----------+--deadline / failures--> Expired
//! ```
//!
//! The session itself is pure: it is fed market cap readings and answers
//! with alerts. Timing, retries and cancellation live in the scheduler.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::alerts::{AlertKind, AlertPayload};
use super::types::Address;

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Sleep before each baseline sample, in order
    pub baseline_delays: Vec<Duration>,
    pub poll_interval: Duration,
    /// Lifetime of the whole session, baseline included
    pub max_duration: Duration,
    /// Percent below baseline that counts as a dip
    pub dip_threshold: Decimal,
    /// Percent above baseline that counts as a revival after a dip
    pub pump_threshold: Decimal,
    /// Percent gains that alert once each
    pub surge_tiers: Vec<Decimal>,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub max_consecutive_failures: u32,
    /// How long a finished session blocks a restart before its record is purged
    pub finished_retention: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            baseline_delays: [5, 15, 25, 35].into_iter().map(Duration::from_secs).collect(),
            poll_interval: Duration::from_secs(50),
            max_duration: Duration::from_secs(30 * 60),
            dip_threshold: dec!(10),
            pump_threshold: dec!(10),
            surge_tiers: vec![dec!(100), dec!(200), dec!(300)],
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            max_consecutive_failures: 5,
            finished_retention: Duration::from_secs(60 * 60),
        }
    }
}

/// Smoothed baseline from early samples
///
/// Non-positive samples are discarded. The result is the average of a
/// weighted mean (sample `i` weighted `i + 1`) and a trimmed mean (single
/// min and max dropped once there are at least five samples). `None` when
/// nothing is left or the sums overflow.
pub fn compute_baseline(samples: &[Decimal]) -> Option<Decimal> {
    let valid: Vec<Decimal> = samples.iter().copied().filter(|s| *s > Decimal::ZERO).collect();
    if valid.is_empty() {
        return None;
    }

    let mut weighted_sum = Decimal::ZERO;
    let mut weight_total = Decimal::ZERO;
    for (i, sample) in valid.iter().enumerate() {
        let weight = Decimal::from(i as u64 + 1);
        weighted_sum = weighted_sum.checked_add(sample.checked_mul(weight)?)?;
        weight_total += weight;
    }
    let weighted = weighted_sum / weight_total;

    let mut sorted = valid.clone();
    sorted.sort();
    let kept = if sorted.len() >= 5 {
        &sorted[1..sorted.len() - 1]
    } else {
        &sorted[..]
    };
    let kept_sum = kept.iter().try_fold(Decimal::ZERO, |acc, s| acc.checked_add(*s))?;
    let trimmed = kept_sum / Decimal::from(kept.len() as u64);

    Some(weighted / dec!(2) + trimmed / dec!(2))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Sampling,
    Armed,
    Dipped,
    Revived,
    Expired,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Revived | Phase::Expired)
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Revived,
    Expired,
    /// No valid baseline sample; never armed
    NoBaseline,
    /// Session task aborted unexpectedly
    Failed,
    Cancelled,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionOutcome::Revived => "revived",
            SessionOutcome::Expired => "expired",
            SessionOutcome::NoBaseline => "no baseline",
            SessionOutcome::Failed => "failed",
            SessionOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// State of one monitoring session
#[derive(Debug, Clone)]
pub struct SamplerSession {
    address: Address,
    dip_threshold: Decimal,
    pump_threshold: Decimal,
    surge_tiers: Vec<Decimal>,
    samples: Vec<Decimal>,
    baseline: Option<Decimal>,
    phase: Phase,
    dip_observed: Option<Decimal>,
    dip_alerted: bool,
    revival_fired: bool,
    surge_tiers_fired: BTreeSet<Decimal>,
    last_value: Option<Decimal>,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

impl SamplerSession {
    pub fn new(address: Address, config: &SamplerConfig) -> Self {
        let started_at = Utc::now();
        let lifetime = chrono::Duration::from_std(config.max_duration).unwrap_or(chrono::Duration::MAX);
        let mut surge_tiers = config.surge_tiers.clone();
        surge_tiers.sort();

        Self {
            address,
            dip_threshold: config.dip_threshold,
            pump_threshold: config.pump_threshold,
            surge_tiers,
            samples: Vec::new(),
            baseline: None,
            phase: Phase::Sampling,
            dip_observed: None,
            dip_alerted: false,
            revival_fired: false,
            surge_tiers_fired: BTreeSet::new(),
            last_value: None,
            started_at,
            deadline: started_at.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn baseline(&self) -> Option<Decimal> {
        self.baseline
    }

    pub fn dip_observed(&self) -> Option<Decimal> {
        self.dip_observed
    }

    pub fn revival_fired(&self) -> bool {
        self.revival_fired
    }

    pub fn last_value(&self) -> Option<Decimal> {
        self.last_value
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Feed one baseline reading (only while sampling)
    pub fn record_baseline_sample(&mut self, value: Decimal) {
        if self.phase == Phase::Sampling && value > Decimal::ZERO {
            self.samples.push(value);
        }
    }

    /// Close the baseline phase; arms the session or expires it
    pub fn finish_baseline(&mut self) -> Option<Decimal> {
        if self.phase != Phase::Sampling {
            return self.baseline;
        }
        match compute_baseline(&self.samples) {
            Some(baseline) => {
                self.arm(baseline);
                Some(baseline)
            }
            None => {
                self.phase = Phase::Expired;
                None
            }
        }
    }

    /// Set the baseline directly and start monitoring
    pub fn arm(&mut self, baseline: Decimal) {
        if self.phase == Phase::Sampling && baseline > Decimal::ZERO {
            self.baseline = Some(baseline);
            self.phase = Phase::Armed;
        }
    }

    pub fn expire(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = Phase::Expired;
        }
    }

    /// Percent deviation of `value` from the baseline
    pub fn deviation(&self, value: Decimal) -> Option<Decimal> {
        let baseline = self.baseline?;
        (value - baseline)
            .checked_div(baseline)
            .and_then(|ratio| ratio.checked_mul(dec!(100)))
    }

    /// Feed one monitoring reading, returning any alerts it triggers
    pub fn observe(&mut self, value: Decimal) -> Vec<AlertPayload> {
        let mut alerts = Vec::new();
        if !matches!(self.phase, Phase::Armed | Phase::Dipped) {
            return alerts;
        }
        let Some(deviation) = self.deviation(value) else {
            return alerts;
        };
        self.last_value = Some(value);

        if deviation <= -self.dip_threshold {
            self.phase = Phase::Dipped;
            self.dip_observed = Some(value);
            if !self.dip_alerted {
                self.dip_alerted = true;
                alerts.push(
                    self.payload(AlertKind::SamplerDip, value, deviation)
                        .with_amount("dip_threshold", self.dip_threshold),
                );
            }
            return alerts;
        }

        self.phase = if self.dip_observed.is_some() { Phase::Dipped } else { Phase::Armed };

        let newly_crossed: Vec<Decimal> = self
            .surge_tiers
            .iter()
            .copied()
            .filter(|tier| deviation >= *tier && !self.surge_tiers_fired.contains(tier))
            .collect();
        if let Some(highest) = newly_crossed.last().copied() {
            self.surge_tiers_fired.extend(newly_crossed);
            alerts.push(
                self.payload(AlertKind::MarketCapSurge, value, deviation)
                    .with_percentage("tier", highest),
            );
        }

        if let Some(dip_low) = self.dip_observed {
            if deviation >= self.pump_threshold && !self.revival_fired {
                self.revival_fired = true;
                self.phase = Phase::Revived;
                alerts.push(
                    self.payload(AlertKind::SamplerRevival, value, deviation)
                        .with_amount("dip_market_cap", dip_low),
                );
            }
        }

        alerts
    }

    fn payload(&self, kind: AlertKind, value: Decimal, deviation: Decimal) -> AlertPayload {
        let mut payload = AlertPayload::new(kind, self.address.clone())
            .with_amount("market_cap", value)
            .with_percentage("deviation", deviation);
        if let Some(baseline) = self.baseline {
            payload = payload.with_amount("baseline", baseline.round_dp(2));
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(baseline: Decimal) -> SamplerSession {
        let mut session = SamplerSession::new(Address::parse("token1").unwrap(), &SamplerConfig::default());
        session.arm(baseline);
        session
    }

    fn kinds(alerts: &[AlertPayload]) -> Vec<AlertKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_baseline_plain_mean_below_five_samples() {
        // weighted: (100 + 2*200) / 3 = 166.66..; mean: 150
        let baseline = compute_baseline(&[dec!(100), dec!(200)]).unwrap();
        assert_eq!(baseline.round_dp(4), dec!(158.3333));
    }

    #[test]
    fn test_baseline_trimmed_with_five_samples() {
        let samples = [dec!(10), dec!(100), dec!(100), dec!(100), dec!(1000)];
        // weighted: (10 + 200 + 300 + 400 + 5000) / 15 = 394
        // trimmed: 100
        assert_eq!(compute_baseline(&samples), Some(dec!(247)));
    }

    #[test]
    fn test_baseline_overflow_is_no_baseline() {
        assert_eq!(compute_baseline(&[Decimal::MAX, Decimal::MAX]), None);
        assert_eq!(compute_baseline(&[Decimal::MAX]), Some(Decimal::MAX / dec!(2) + Decimal::MAX / dec!(2)));
    }

    #[test]
    fn test_baseline_discards_zero_samples() {
        assert_eq!(compute_baseline(&[dec!(0), dec!(0)]), None);
        assert_eq!(compute_baseline(&[]), None);
        assert_eq!(compute_baseline(&[dec!(0), dec!(50)]), Some(dec!(50)));
    }

    #[test]
    fn test_dip_then_single_revival() {
        let mut session = armed(dec!(100000));

        let dip = session.observe(dec!(88000));
        assert_eq!(kinds(&dip), vec![AlertKind::SamplerDip]);
        assert_eq!(session.phase(), Phase::Dipped);
        assert_eq!(dip[0].percentage("deviation"), Some(dec!(-12)));

        let revival = session.observe(dec!(112000));
        assert_eq!(kinds(&revival), vec![AlertKind::SamplerRevival]);
        assert_eq!(session.phase(), Phase::Revived);
        assert!(session.revival_fired());

        assert!(session.observe(dec!(113000)).is_empty());
    }

    #[test]
    fn test_pump_without_dip_is_not_revival() {
        let mut session = armed(dec!(100000));
        assert!(session.observe(dec!(120000)).is_empty());
        assert_eq!(session.phase(), Phase::Armed);
        assert!(!session.revival_fired());
    }

    #[test]
    fn test_dip_is_reenterable_but_alerts_once() {
        let mut session = armed(dec!(1000));
        assert_eq!(kinds(&session.observe(dec!(850))), vec![AlertKind::SamplerDip]);
        assert!(session.observe(dec!(980)).is_empty());
        assert_eq!(session.phase(), Phase::Dipped);
        assert!(session.observe(dec!(700)).is_empty());
        assert_eq!(session.dip_observed(), Some(dec!(700)));
        assert_eq!(kinds(&session.observe(dec!(1100))), vec![AlertKind::SamplerRevival]);
    }

    #[test]
    fn test_surge_tiers_fire_once_each() {
        let mut session = armed(dec!(1000));

        let first = session.observe(dec!(2100));
        assert_eq!(kinds(&first), vec![AlertKind::MarketCapSurge]);
        assert_eq!(first[0].percentage("tier"), Some(dec!(100)));

        assert!(session.observe(dec!(2500)).is_empty());

        // Jumping past two tiers reports only the highest
        let second = session.observe(dec!(4500));
        assert_eq!(kinds(&second), vec![AlertKind::MarketCapSurge]);
        assert_eq!(second[0].percentage("tier"), Some(dec!(300)));

        assert!(session.observe(dec!(5000)).is_empty());
    }

    #[test]
    fn test_no_baseline_expires_without_arming() {
        let mut session = SamplerSession::new(Address::parse("token1").unwrap(), &SamplerConfig::default());
        session.record_baseline_sample(dec!(0));
        assert_eq!(session.finish_baseline(), None);
        assert_eq!(session.phase(), Phase::Expired);
        assert!(session.observe(dec!(100)).is_empty());
    }

    #[test]
    fn test_baseline_set_once() {
        let mut session = SamplerSession::new(Address::parse("token1").unwrap(), &SamplerConfig::default());
        session.record_baseline_sample(dec!(100));
        assert_eq!(session.finish_baseline(), Some(dec!(100)));
        session.arm(dec!(5));
        session.record_baseline_sample(dec!(5));
        assert_eq!(session.baseline(), Some(dec!(100)));
        assert_eq!(session.phase(), Phase::Armed);
    }

    #[test]
    fn test_expired_session_ignores_readings() {
        let mut session = armed(dec!(1000));
        session.observe(dec!(800));
        session.expire();
        assert!(session.observe(dec!(2000)).is_empty());
        assert_eq!(session.phase(), Phase::Expired);
    }
}
