//! Calendar month of a shard, in UTC.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A (year, month) pair. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardMonth {
    year: i32,
    month: u32,
}

impl ShardMonth {
    /// Returns `None` unless `month` is in `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
        }
    }

    /// Month containing the given epoch-millisecond timestamp.
    ///
    /// Timestamps beyond chrono's range clamp to its first or last representable month.
    pub fn from_timestamp_ms(timestamp_ms: i64) -> Self {
        let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or(if timestamp_ms < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self::from_datetime(dt)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// `YYYYMM`, the prefix of every shard file name.
    pub fn code(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// Parse a `YYYYMM` prefix.
    pub fn parse_code(code: &str) -> Option<Self> {
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = code[..4].parse().ok()?;
        let month = code[4..].parse().ok()?;
        Self::new(year, month)
    }
}

impl fmt::Display for ShardMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
