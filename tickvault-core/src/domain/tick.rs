//! Tick: one top-of-book sample for a market.

use serde::{Deserialize, Serialize};

/// Aggressor direction of the last trade carried by a tick.
///
/// Stored on disk as a single signed byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum Direction {
    Short = -1,
    #[default]
    Neutral = 0,
    Long = 1,
}

impl Direction {
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    /// Decode the on-disk byte. Anything outside `{-1, 0, 1}` is rejected.
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            -1 => Some(Direction::Short),
            0 => Some(Direction::Neutral),
            1 => Some(Direction::Long),
            _ => None,
        }
    }
}

/// A single tick for one (broker, market) pair.
///
/// Ticks have no identity of their own: they live at an implicit position in
/// an append-only, timestamp-ascending sequence and are never updated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Milliseconds since the Unix epoch (UTC).
    pub timestamp_ms: i64,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
    pub direction: Direction,
}

impl TickRecord {
    pub fn new(
        timestamp_ms: i64,
        bid: f64,
        ask: f64,
        last: f64,
        volume: f64,
        direction: Direction,
    ) -> Self {
        Self {
            timestamp_ms,
            bid,
            ask,
            last,
            volume,
            direction,
        }
    }

    /// Field-wise equality with a float tolerance; timestamp and direction must match exactly.
    pub fn approx_eq(&self, other: &TickRecord, epsilon: f64) -> bool {
        self.timestamp_ms == other.timestamp_ms
            && self.direction == other.direction
            && (self.bid - other.bid).abs() <= epsilon
            && (self.ask - other.ask).abs() <= epsilon
            && (self.last - other.last).abs() <= epsilon
            && (self.volume - other.volume).abs() <= epsilon
    }
}
