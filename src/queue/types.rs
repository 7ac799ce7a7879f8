// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue state and delivery sequence types.
//!
//! # State Transitions
//!
//! ```text
//!               connect ok
//! Disconnected ────────────→ Connected
//!    │                          │   ↑
//!    │ connect failed           │   │ reconnect ok
//!    ↓          connection lost ↓   │
//! Reconnecting ←──────────────────  │
//!    │  └───────────────────────────┘
//!    │
//!    │ close() (from any state)
//!    ↓
//! Closed
//! ```

use crate::error::{ReplicationError, Result};
use std::fmt;
use std::str::FromStr;

/// Connection state of the change queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No connection held and no reconnect running yet.
    Disconnected,

    /// Connected; the subscription is active unless the queue is write-only.
    Connected,

    /// The background task is retrying on a fixed interval.
    Reconnecting,

    /// Terminal. Background tasks have been joined.
    Closed,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Disconnected => write!(f, "Disconnected"),
            QueueState::Connected => write!(f, "Connected"),
            QueueState::Reconnecting => write!(f, "Reconnecting"),
            QueueState::Closed => write!(f, "Closed"),
        }
    }
}

/// Delivery sequence assigned by the log service.
///
/// Maps one-to-one onto a Redis stream entry ID (`"<millis>-<counter>"`) and
/// orders the same way: by time first, then by the per-millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sequence {
    pub millis: u64,
    pub counter: u64,
}

impl Sequence {
    /// Position before every entry (`"0-0"`).
    pub const ZERO: Sequence = Sequence { millis: 0, counter: 0 };

    pub fn new(millis: u64, counter: u64) -> Self {
        Self { millis, counter }
    }

    /// Parse a stream entry ID.
    ///
    /// A bare `"<millis>"` is accepted with counter 0, as Redis does.
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = || ReplicationError::Decode(format!("invalid stream entry id: {:?}", id));

        let (millis, counter) = match id.split_once('-') {
            Some((millis, counter)) => (millis, Some(counter)),
            None => (id, None),
        };
        let millis = parse_digits(millis).ok_or_else(invalid)?;
        let counter = match counter {
            Some(counter) => parse_digits(counter).ok_or_else(invalid)?,
            None => 0,
        };
        Ok(Self { millis, counter })
    }
}

/// Decimal digits only: `u64::from_str` would also take a leading `+`.
fn parse_digits(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.counter)
    }
}

impl FromStr for Sequence {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
