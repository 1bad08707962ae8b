//! Lamport-style logical clock used to order and tie-break concurrent edits.
//!
//! A clock is a monotonically non-decreasing counter paired with a random
//! token that is regenerated on every advance:
//! - The counter orders causally related events
//! - The token breaks ties between clocks advanced independently
//!
//! Ordering is lexicographic on `(counter, token)`, so two clocks compare
//! equal only when they are bit-identical.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Size of the fixed wire form: 8-byte counter followed by the 16-byte token.
pub const CLOCK_BYTES: usize = 24;

/// A logical clock value: counter plus globally unique tie-break token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalClock {
    /// Lamport counter, never decremented
    pub counter: u64,
    /// Random token, used only to break ties between equal counters
    pub token: Uuid,
}

impl LogicalClock {
    /// Create a clock at zero with a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: 0,
            token: Uuid::new_v4(),
        }
    }

    /// The identity clock: counter zero and the nil token.
    ///
    /// Sorts before every clock produced by [`LogicalClock::new`].
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            counter: 0,
            token: Uuid::nil(),
        }
    }

    /// Return the successor of this clock with a regenerated token.
    #[must_use]
    pub fn advance(&self) -> Self {
        Self {
            counter: self.counter.saturating_add(1),
            token: Uuid::new_v4(),
        }
    }

    /// Advance this clock in place.
    pub fn tick(&mut self) {
        *self = self.advance();
    }

    /// A clock that strictly succeeds both inputs.
    #[must_use]
    pub fn merged(left: &Self, right: &Self) -> Self {
        Self {
            counter: left.counter.max(right.counter).saturating_add(1),
            token: Uuid::new_v4(),
        }
    }

    /// Serialize to the fixed 24-byte big-endian form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CLOCK_BYTES] {
        let mut bytes = [0u8; CLOCK_BYTES];
        bytes[..8].copy_from_slice(&self.counter.to_be_bytes());
        bytes[8..].copy_from_slice(self.token.as_bytes());
        bytes
    }

    /// Deserialize from the fixed 24-byte form.
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 24 bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClockError> {
        let insufficient = || ClockError::InsufficientBytes {
            expected: CLOCK_BYTES,
            actual: bytes.len(),
        };

        let counter: [u8; 8] = bytes
            .get(0..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(insufficient)?;
        let token: [u8; 16] = bytes
            .get(8..CLOCK_BYTES)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(insufficient)?;

        Ok(Self {
            counter: u64::from_be_bytes(counter),
            token: Uuid::from_bytes(token),
        })
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Ord for LogicalClock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.token.cmp(&other.token))
    }
}

impl PartialOrd for LogicalClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.token.simple().to_string();
        write!(f, "{}@{}", self.counter, &token[..8])
    }
}

/// Errors that can occur with clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Insufficient bytes for deserialization
    #[error("insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },
}
