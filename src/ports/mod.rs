//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - The event transport (`EventSource`)
//! - Market data lookups (`MarketDataProvider`)
//! - Alert delivery (`AlertSink`)
//!
//! `mocks` holds recording doubles used by unit and integration tests.

pub mod alert_sink;
pub mod event_source;
pub mod market_data;
pub mod mocks;

pub use alert_sink::AlertSink;
pub use event_source::{EventSource, EventSourceError};
pub use market_data::{MarketDataError, MarketDataProvider, MarketSnapshot};

#[cfg(test)]
pub use market_data::MockMarketDataProvider;
