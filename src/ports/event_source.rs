//! Event source port

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RawEvent;

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed event at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Supplier of raw events
///
/// `Ok(None)` means the source is exhausted. An error concerns a single
/// poll; callers may keep polling afterwards.
#[async_trait]
pub trait EventSource: Send {
    async fn poll(&mut self) -> Result<Option<RawEvent>, EventSourceError>;
}
