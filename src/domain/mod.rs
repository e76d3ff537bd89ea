//! Domain Layer - Core logic for swapwatch
//!
//! Pure types and state machines with no I/O. Everything that talks to the
//! outside world goes through the ports layer.
//!
//! - `types`: addresses, channel categories, raw events and parsed facts
//! - `extractor`: swap-text grammar
//! - `ledger`: per-address running totals behind an address-scoped lock
//! - `correlation`: primary/secondary channel overlap detection
//! - `thresholds`: rule set with hysteresis
//! - `sampler`: market cap monitoring session
//! - `alerts`: alert payloads and hysteresis marks

pub mod alerts;
pub mod correlation;
pub mod extractor;
pub mod ledger;
pub mod sampler;
pub mod thresholds;
pub mod types;

pub use alerts::{AlertKind, AlertMark, AlertPayload};
pub use correlation::{CorrelationConfig, CorrelationEngine};
pub use extractor::{AmountExtractor, ExtractError, MAX_AMOUNT};
pub use ledger::{
    AddressLedger, ApplyOutcome, CategoryTotals, LedgerError, LedgerHandle, LedgerRegistry,
    LedgerSnapshot, LedgerStats, DEFAULT_DEDUP_LIMIT, DEFAULT_HISTORY_LIMIT,
};
pub use sampler::{compute_baseline, Phase, SamplerConfig, SamplerSession, SessionOutcome};
pub use thresholds::{ThresholdAlertEngine, ThresholdConfig};
pub use types::{Address, AddressError, Category, Direction, RawEvent, TransactionFact};
