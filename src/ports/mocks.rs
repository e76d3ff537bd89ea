//! Hand-written port doubles
//!
//! Each double records its calls and shares state through `Arc`, so a test
//! can keep a clone after handing one to the pipeline or scheduler.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{AlertSink, EventSource, EventSourceError, MarketDataError, MarketDataProvider, MarketSnapshot};
use crate::domain::{Address, AlertKind, AlertPayload, RawEvent};

/// Market data double with scripted per-address readings
///
/// Scripted entries are consumed in order; `None` entries fail the read.
/// Once an address's script is used up, its fallback value (if any) is
/// returned on every call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedMarketData {
    scripts: Arc<Mutex<HashMap<Address, VecDeque<Option<Decimal>>>>>,
    fallback: Arc<Mutex<HashMap<Address, Decimal>>>,
    calls: Arc<Mutex<Vec<Address>>>,
}

impl ScriptedMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to queue readings for an address
    pub fn with_script(self, address: &Address, readings: impl IntoIterator<Item = Option<Decimal>>) -> Self {
        self.push_script(address, readings);
        self
    }

    /// Builder method to set the steady-state reading for an address
    pub fn with_fallback(self, address: &Address, market_cap: Decimal) -> Self {
        self.set_market_cap(address, market_cap);
        self
    }

    pub fn push_script(&self, address: &Address, readings: impl IntoIterator<Item = Option<Decimal>>) {
        self.scripts
            .lock()
            .entry(address.clone())
            .or_default()
            .extend(readings);
    }

    pub fn set_market_cap(&self, address: &Address, market_cap: Decimal) {
        self.fallback.lock().insert(address.clone(), market_cap);
    }

    /// All recorded calls
    pub fn get_calls(&self) -> Vec<Address> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, address: &Address) -> usize {
        self.calls.lock().iter().filter(|a| *a == address).count()
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedMarketData {
    async fn snapshot(&self, address: &Address) -> Result<MarketSnapshot, MarketDataError> {
        self.calls.lock().push(address.clone());

        let scripted = self
            .scripts
            .lock()
            .get_mut(address)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Some(market_cap)) => Ok(MarketSnapshot::with_market_cap(market_cap)),
            Some(None) => Err(MarketDataError::Http("scripted failure".to_string())),
            None => self
                .fallback
                .lock()
                .get(address)
                .map(|mc| MarketSnapshot::with_market_cap(*mc))
                .ok_or_else(|| MarketDataError::NotFound(address.to_string())),
        }
    }
}

/// Alert sink that keeps every published alert
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    alerts: Arc<Mutex<Vec<AlertPayload>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AlertPayload> {
        self.alerts.lock().clone()
    }

    pub fn kinds(&self) -> Vec<AlertKind> {
        self.alerts.lock().iter().map(|a| a.kind).collect()
    }

    pub fn count_of(&self, kind: AlertKind) -> usize {
        self.alerts.lock().iter().filter(|a| a.kind == kind).count()
    }
}

impl AlertSink for RecordingAlertSink {
    fn publish(&self, alert: AlertPayload) {
        self.alerts.lock().push(alert);
    }
}

/// Event source over a fixed list; `Err` entries are returned as transport errors
#[derive(Debug, Default)]
pub struct VecEventSource {
    events: VecDeque<Result<RawEvent, String>>,
}

impl VecEventSource {
    pub fn new(events: impl IntoIterator<Item = RawEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
        }
    }

    /// Builder method to queue a failing poll
    pub fn with_error(mut self, message: &str) -> Self {
        self.events.push_back(Err(message.to_string()));
        self
    }

    pub fn with_event(mut self, event: RawEvent) -> Self {
        self.events.push_back(Ok(event));
        self
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventSource for VecEventSource {
    async fn poll(&mut self) -> Result<Option<RawEvent>, EventSourceError> {
        match self.events.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(message)) => Err(EventSourceError::Transport(message)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scripted_market_data() {
        let a = Address::parse("token1").unwrap();
        let data = ScriptedMarketData::new()
            .with_script(&a, [Some(dec!(10)), None])
            .with_fallback(&a, dec!(99));

        assert_eq!(data.snapshot(&a).await.unwrap().market_cap, dec!(10));
        assert!(data.snapshot(&a).await.is_err());
        assert_eq!(data.snapshot(&a).await.unwrap().market_cap, dec!(99));
        assert_eq!(data.call_count(&a), 3);

        let other = Address::parse("token2").unwrap();
        assert!(matches!(data.snapshot(&other).await, Err(MarketDataError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_vec_event_source() {
        let mut source = VecEventSource::new([RawEvent::new("whale", "abc", "text")]).with_error("boom");
        assert!(source.poll().await.unwrap().is_some());
        assert!(source.poll().await.is_err());
        assert!(source.poll().await.unwrap().is_none());
    }
}
