//! Record types shared by the tick store and the persistence dispatcher.

pub mod entity;
pub mod ohlc;
pub mod tick;

pub use entity::{
    AssetRecord, LiquidationKey, LiquidationRecord, MarketInfoRecord, UserTradeRecord,
};
pub use ohlc::{OhlcKey, OhlcRecord, MIN_PERSISTED_TIMEFRAME_SECS};
pub use tick::{Direction, TickRecord};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one market on one broker. Tick shards are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub broker_id: String,
    pub market_id: String,
}

impl MarketKey {
    pub fn new(broker_id: impl Into<String>, market_id: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            market_id: market_id.into(),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.broker_id, self.market_id)
    }
}
