//! JSON Lines event source
//!
//! Reads one event per line from a file or stdin:
//!
//! ```text
//! {"category":"Whale","address":"7xKX...","raw_text":"... swapped 15 SOL for ..."}
//! ```
//!
//! `observed_at` is optional and defaults to the time the line was read.
//! Blank lines are skipped; malformed lines are reported and skipped.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::domain::RawEvent;
use crate::ports::{EventSource, EventSourceError};

pub struct JsonLinesEventSource {
    lines: Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>,
    line_number: usize,
}

impl JsonLinesEventSource {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let boxed: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: BufReader::new(boxed).lines(),
            line_number: 0,
        }
    }

    /// Open a file, or stdin for `-`
    pub async fn open(path: &Path) -> Result<Self, EventSourceError> {
        if path.as_os_str() == "-" {
            return Ok(Self::stdin());
        }
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let file = tokio::fs::File::open(expanded).await?;
        Ok(Self::from_reader(file))
    }

    pub fn stdin() -> Self {
        Self::from_reader(tokio::io::stdin())
    }
}

#[async_trait]
impl EventSource for JsonLinesEventSource {
    async fn poll(&mut self) -> Result<Option<RawEvent>, EventSourceError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str::<RawEvent>(trimmed)
                .map(Some)
                .map_err(|e| EventSourceError::Malformed {
                    line: self.line_number,
                    message: e.to_string(),
                });
        }
    }
}
