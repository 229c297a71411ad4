//! OHLC bar: an aggregated candle for one market and timeframe.

use serde::{Deserialize, Serialize};

/// Bars below this timeframe are never written to relational storage.
pub const MIN_PERSISTED_TIMEFRAME_SECS: u32 = 60;

/// Upsert key of an OHLC bar: a later write for the same key replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OhlcKey {
    pub broker_id: String,
    pub market_id: String,
    pub timeframe_seconds: u32,
    pub timestamp_ms: i64,
}

/// OHLC bar with spread and volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcRecord {
    pub broker_id: String,
    pub market_id: String,
    /// Bar open time, milliseconds since the Unix epoch (UTC).
    pub timestamp_ms: i64,
    pub timeframe_seconds: u32,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub spread: f64,
    pub volume: f64,
}

impl OhlcRecord {
    pub fn key(&self) -> OhlcKey {
        OhlcKey {
            broker_id: self.broker_id.clone(),
            market_id: self.market_id.clone(),
            timeframe_seconds: self.timeframe_seconds,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Whether the persistence policy stores bars of this timeframe at all.
    pub fn is_persistable(&self) -> bool {
        self.timeframe_seconds >= MIN_PERSISTED_TIMEFRAME_SECS
    }

    /// Bar close time in milliseconds.
    pub fn end_ms(&self) -> i64 {
        self.timestamp_ms + i64::from(self.timeframe_seconds) * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> OhlcRecord {
        OhlcRecord {
            broker_id: "binance.com".into(),
            market_id: "BTCUSDT".into(),
            timestamp_ms: 1_704_067_200_000,
            timeframe_seconds: 60,
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            spread: 0.5,
            volume: 12.0,
        }
    }

    #[test]
    fn sub_minute_bars_are_not_persistable() {
        let mut bar = sample_bar();
        assert!(bar.is_persistable());
        bar.timeframe_seconds = 30;
        assert!(!bar.is_persistable());
    }

    #[test]
    fn key_ignores_prices() {
        let a = sample_bar();
        let mut b = sample_bar();
        b.close = 1.0;
        assert_eq!(a.key(), b.key());
        assert_eq!(a.end_ms(), a.timestamp_ms + 60_000);
    }
}
