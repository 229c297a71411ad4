//! Account- and market-level entities persisted next to the price series.

use serde::{Deserialize, Serialize};

use super::tick::Direction;

/// Balance of one asset on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub broker_id: String,
    pub account_id: String,
    pub asset_id: String,
    pub last_trade_id: String,
    pub timestamp_ms: i64,
    pub free: f64,
    pub locked: f64,
    /// Average entry price in the account quote currency.
    pub price: f64,
    pub quote_symbol: String,
}

impl AssetRecord {
    pub fn key(&self) -> (String, String, String) {
        (
            self.broker_id.clone(),
            self.account_id.clone(),
            self.asset_id.clone(),
        )
    }
}

/// A forced liquidation observed on a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    pub broker_id: String,
    pub market_id: String,
    pub timestamp_ms: i64,
    pub direction: Direction,
    pub price: f64,
    pub quantity: f64,
}

/// Natural key of a liquidation. Prices are compared by bit pattern.
pub type LiquidationKey = (String, String, i64, i8, u64, u64);

impl LiquidationRecord {
    /// Every field identifies the event, so re-inserting the same
    /// liquidation is a no-op for an upserting backend.
    pub fn key(&self) -> LiquidationKey {
        (
            self.broker_id.clone(),
            self.market_id.clone(),
            self.timestamp_ms,
            self.direction.as_i8(),
            self.price.to_bits(),
            self.quantity.to_bits(),
        )
    }
}

/// Static trading properties of a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInfoRecord {
    pub broker_id: String,
    pub market_id: String,
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub lot_size: f64,
    pub contract_size: f64,
    pub min_notional: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub updated_ms: i64,
}

impl MarketInfoRecord {
    pub fn key(&self) -> (String, String) {
        (self.broker_id.clone(), self.market_id.clone())
    }
}

/// A closed or still-open trade owned by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTradeRecord {
    pub broker_id: String,
    pub account_id: String,
    pub strategy_id: String,
    pub trade_id: u64,
    pub market_id: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub pnl: f64,
    pub opened_ms: i64,
    pub closed_ms: Option<i64>,
}

impl UserTradeRecord {
    pub fn key(&self) -> (String, String, String, u64) {
        (
            self.broker_id.clone(),
            self.account_id.clone(),
            self.strategy_id.clone(),
            self.trade_id,
        )
    }
}
