//! Event Pipeline
//!
//! Processes one raw event at a time, synchronously:
//!
//! 1. Normalize the address
//! 2. Extract the `(amount, direction)` fact
//! 3. Apply it to the address ledger (address lock held from here)
//! 4. Record channel membership and check for a correlation
//! 5. Run the threshold rules over a snapshot of the ledger
//! 6. Publish alerts and start a sampler when a trigger condition holds
//!
//! `run` drives `ingest` from an [`EventSource`] until the source is
//! exhausted or the shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scheduler::SamplerScheduler;
use crate::domain::{
    Address, AlertKind, AlertPayload, AmountExtractor, ApplyOutcome, Category, CorrelationEngine,
    ExtractError, LedgerError, LedgerRegistry, LedgerSnapshot, LedgerStats, RawEvent,
    ThresholdAlertEngine, TransactionFact,
};
use crate::ports::{AlertSink, EventSource};

/// Pause after a failed poll before trying the source again
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Which conditions start a sampler for an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerTriggers {
    pub on_correlation: bool,
    pub on_large_buy: bool,
}

impl Default for SamplerTriggers {
    fn default() -> Self {
        Self {
            on_correlation: true,
            on_large_buy: true,
        }
    }
}

impl SamplerTriggers {
    fn fires_on(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::Correlation => self.on_correlation,
            AlertKind::LargeBuy | AlertKind::TwoLargeBuys => self.on_large_buy,
            _ => false,
        }
    }
}

/// Result of ingesting one event
#[derive(Debug)]
pub enum IngestOutcome {
    /// Address failed validation; nothing recorded
    Rejected(LedgerError),
    /// Text produced no fact; nothing recorded
    Dropped(ExtractError),
    /// Same text already recorded for this channel
    Duplicate,
    Applied {
        alerts: Vec<AlertPayload>,
        sampler_started: bool,
    },
}

impl IngestOutcome {
    pub fn alerts(&self) -> &[AlertPayload] {
        match self {
            IngestOutcome::Applied { alerts, .. } => alerts,
            _ => &[],
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, IngestOutcome::Applied { .. })
    }
}

/// Counters from one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub events: u64,
    pub applied: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub alerts: u64,
    pub samplers_started: u64,
    pub poll_errors: u64,
}

impl PipelineReport {
    fn record(&mut self, outcome: &IngestOutcome) {
        self.events += 1;
        match outcome {
            IngestOutcome::Rejected(_) => self.rejected += 1,
            IngestOutcome::Dropped(_) => self.dropped += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Applied { alerts, sampler_started } => {
                self.applied += 1;
                self.alerts += alerts.len() as u64;
                if *sampler_started {
                    self.samplers_started += 1;
                }
            }
        }
    }
}

pub struct EventPipeline {
    extractor: AmountExtractor,
    ledgers: LedgerRegistry,
    correlation: CorrelationEngine,
    thresholds: ThresholdAlertEngine,
    scheduler: SamplerScheduler,
    sink: Arc<dyn AlertSink>,
    triggers: SamplerTriggers,
}

impl EventPipeline {
    pub fn new(
        ledgers: LedgerRegistry,
        correlation: CorrelationEngine,
        thresholds: ThresholdAlertEngine,
        scheduler: SamplerScheduler,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            extractor: AmountExtractor::new(),
            ledgers,
            correlation,
            thresholds,
            scheduler,
            sink,
            triggers: SamplerTriggers::default(),
        }
    }

    pub fn with_triggers(mut self, triggers: SamplerTriggers) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn scheduler(&self) -> &SamplerScheduler {
        &self.scheduler
    }

    pub fn ledgers(&self) -> &LedgerRegistry {
        &self.ledgers
    }

    pub fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    /// Process one event end to end
    pub fn ingest(&self, event: RawEvent) -> IngestOutcome {
        let address = match Address::parse(&event.address) {
            Ok(address) => address,
            Err(e) => {
                warn!("Rejected event from {}: {}", event.category, e);
                return IngestOutcome::Rejected(e.into());
            }
        };
        let category = Category::parse(&event.category);

        let (amount, direction) = match self.extractor.try_extract(&event.raw_text) {
            Ok(fact) => fact,
            Err(e) => {
                debug!("Dropped event for {} from {}: {}", address.short(), category, e);
                return IngestOutcome::Dropped(e);
            }
        };

        let fact = TransactionFact {
            address: address.clone(),
            category: category.clone(),
            amount,
            direction,
            raw_text: event.raw_text,
            observed_at: event.observed_at,
        };

        let mut alerts = Vec::new();
        {
            let handle = self.ledgers.ledger(&address);
            let mut ledger = handle.lock();

            match ledger.apply(fact) {
                Ok(ApplyOutcome::Recorded) => {}
                Ok(ApplyOutcome::Duplicate) => {
                    debug!("Duplicate event for {} from {}", address.short(), category);
                    return IngestOutcome::Duplicate;
                }
                Err(e) => {
                    warn!("Ledger rejected event for {}: {}", address, e);
                    return IngestOutcome::Rejected(e);
                }
            }
            debug!("{} {} SOL on {} via {}", direction, amount, address.short(), category);

            let snapshot = ledger.snapshot();

            self.correlation.observe(&address, &category);
            if let Some((primary, secondary)) = self.correlation.check_correlation(&address) {
                alerts.push(self.correlation_alert(&snapshot, primary, secondary));
            }

            alerts.extend(self.thresholds.evaluate(&snapshot, ledger.alert_marks_mut()));
        }

        for alert in &alerts {
            info!("{}", alert.summary());
            self.sink.publish(alert.clone());
        }

        let sampler_started = alerts.iter().any(|a| self.triggers.fires_on(a.kind))
            && self.scheduler.start(&address);

        IngestOutcome::Applied {
            alerts,
            sampler_started,
        }
    }

    fn correlation_alert(&self, snapshot: &LedgerSnapshot, primary: Category, secondary: Category) -> AlertPayload {
        let mut alert = AlertPayload::new(AlertKind::Correlation, snapshot.address.clone())
            .with_category(primary)
            .with_category(secondary);
        for category in self.correlation.secondary_matches(&snapshot.address) {
            alert = alert.with_category(category);
        }
        for (category, total) in snapshot.buy_totals() {
            alert = alert.with_amount(category.as_str(), total);
        }
        for fact in snapshot.recent.iter().take(3) {
            alert = alert.with_raw_text(fact.raw_text.clone());
        }
        alert
    }

    /// Consume events until the source is exhausted or shutdown fires
    pub async fn run<S>(&self, source: &mut S, shutdown: CancellationToken) -> PipelineReport
    where
        S: EventSource + ?Sized,
    {
        let mut report = PipelineReport::default();
        info!("Event pipeline started");

        loop {
            let polled = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping event pipeline");
                    break;
                }
                polled = source.poll() => polled,
            };

            match polled {
                Ok(Some(event)) => {
                    let outcome = self.ingest(event);
                    report.record(&outcome);
                }
                Ok(None) => {
                    info!("Event source exhausted");
                    break;
                }
                Err(e) => {
                    report.poll_errors += 1;
                    warn!("Event source error: {}", e);
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(
            "Event pipeline finished: {} events, {} applied, {} alerts, {} samplers",
            report.events, report.applied, report.alerts, report.samplers_started
        );
        report
    }

    /// Stop monitoring an address and drop everything known about it
    pub fn untrack(&self, address: &Address) -> bool {
        let stopped = self.scheduler.stop(address);
        let removed = self.ledgers.remove(address);
        self.correlation.forget(address);
        if stopped || removed {
            info!("Untracked {}", address);
        }
        removed
    }

    pub fn stats(&self, address: &Address) -> Option<LedgerStats> {
        self.ledgers
            .get(address)
            .map(|handle| handle.lock().stats(chrono::Utc::now()))
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
