//! In-memory backend: ordered tables keyed by each kind's upsert key.
//!
//! Clones share the same tables, so a test can keep a handle while the
//! dispatcher owns another.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tickvault_core::domain::{
    AssetRecord, LiquidationKey, LiquidationRecord, MarketInfoRecord, OhlcKey, OhlcRecord,
    UserTradeRecord,
};

use super::{BackendError, DeleteCriteria, Query, RelationalBackend, Rows};

type AssetKey = (String, String, String);
type MarketInfoKey = (String, String);
type UserTradeKey = (String, String, String, u64);

#[derive(Debug, Default)]
struct Tables {
    ohlc: BTreeMap<OhlcKey, OhlcRecord>,
    assets: BTreeMap<AssetKey, AssetRecord>,
    liquidations: BTreeMap<LiquidationKey, LiquidationRecord>,
    market_info: BTreeMap<MarketInfoKey, MarketInfoRecord>,
    user_trades: BTreeMap<UserTradeKey, UserTradeRecord>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ohlc_len(&self) -> usize {
        self.tables().ohlc.len()
    }

    pub fn ohlc_rows(&self) -> Vec<OhlcRecord> {
        self.tables().ohlc.values().cloned().collect()
    }

    pub fn asset_rows(&self) -> Vec<AssetRecord> {
        self.tables().assets.values().cloned().collect()
    }

    pub fn liquidation_rows(&self) -> Vec<LiquidationRecord> {
        self.tables().liquidations.values().cloned().collect()
    }

    pub fn market_info_rows(&self) -> Vec<MarketInfoRecord> {
        self.tables().market_info.values().cloned().collect()
    }

    pub fn user_trade_rows(&self) -> Vec<UserTradeRecord> {
        self.tables().user_trades.values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.tables().closed
    }
}

fn ohlc_bound(broker_id: &str, market_id: &str, timeframe_seconds: u32, ts: i64) -> OhlcKey {
    OhlcKey {
        broker_id: broker_id.to_string(),
        market_id: market_id.to_string(),
        timeframe_seconds,
        timestamp_ms: ts,
    }
}

impl RelationalBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn insert(&mut self, rows: &Rows) -> Result<(), BackendError> {
        let mut t = self.tables();
        if t.closed {
            return Err(BackendError::Closed);
        }
        match rows {
            Rows::Ohlc(batch) => {
                for row in batch {
                    t.ohlc.insert(row.key(), row.clone());
                }
            }
            Rows::Asset(batch) => {
                for row in batch {
                    t.assets.insert(row.key(), row.clone());
                }
            }
            Rows::Liquidation(batch) => {
                for row in batch {
                    t.liquidations.insert(row.key(), row.clone());
                }
            }
            Rows::MarketInfo(batch) => {
                for row in batch {
                    t.market_info.insert(row.key(), row.clone());
                }
            }
            Rows::UserTrade(batch) => {
                for row in batch {
                    t.user_trades.insert(row.key(), row.clone());
                }
            }
        }
        Ok(())
    }

    fn select(&mut self, query: &Query) -> Result<Rows, BackendError> {
        let t = self.tables();
        if t.closed {
            return Err(BackendError::Closed);
        }
        let rows = match query {
            Query::OhlcRange {
                broker_id,
                market_id,
                timeframe_seconds,
                from_ms,
                to_ms,
            } => {
                if from_ms > to_ms {
                    return Ok(Rows::Ohlc(Vec::new()));
                }
                let lo = ohlc_bound(broker_id, market_id, *timeframe_seconds, *from_ms);
                let hi = ohlc_bound(broker_id, market_id, *timeframe_seconds, *to_ms);
                Rows::Ohlc(t.ohlc.range(lo..=hi).map(|(_, r)| r.clone()).collect())
            }
            Query::OhlcLastN {
                broker_id,
                market_id,
                timeframe_seconds,
                limit,
                before_ms,
            } => {
                let lo = ohlc_bound(broker_id, market_id, *timeframe_seconds, i64::MIN);
                let hi = ohlc_bound(
                    broker_id,
                    market_id,
                    *timeframe_seconds,
                    before_ms.unwrap_or(i64::MAX),
                );
                let mut bars: Vec<_> = if before_ms.is_some() {
                    t.ohlc.range(lo..hi).rev().take(*limit).map(|(_, r)| r.clone()).collect()
                } else {
                    t.ohlc.range(lo..=hi).rev().take(*limit).map(|(_, r)| r.clone()).collect()
                };
                bars.reverse();
                Rows::Ohlc(bars)
            }
            Query::AssetsByAccount {
                broker_id,
                account_id,
            } => Rows::Asset(
                t.assets
                    .values()
                    .filter(|a| &a.broker_id == broker_id && &a.account_id == account_id)
                    .cloned()
                    .collect(),
            ),
            Query::MarketInfo {
                broker_id,
                market_id,
            } => Rows::MarketInfo(
                t.market_info
                    .values()
                    .filter(|m| &m.broker_id == broker_id)
                    .filter(|m| market_id.as_ref().map_or(true, |id| &m.market_id == id))
                    .cloned()
                    .collect(),
            ),
            Query::UserTradesByStrategy {
                broker_id,
                account_id,
                strategy_id,
            } => Rows::UserTrade(
                t.user_trades
                    .values()
                    .filter(|u| {
                        &u.broker_id == broker_id
                            && &u.account_id == account_id
                            && &u.strategy_id == strategy_id
                    })
                    .cloned()
                    .collect(),
            ),
        };
        Ok(rows)
    }

    fn delete(&mut self, criteria: &DeleteCriteria) -> Result<u64, BackendError> {
        let mut t = self.tables();
        if t.closed {
            return Err(BackendError::Closed);
        }
        match *criteria {
            DeleteCriteria::OhlcOlderThan {
                timeframe_ceiling_secs,
                cutoff_ms,
            } => {
                let before = t.ohlc.len();
                t.ohlc.retain(|key, _| {
                    !(key.timeframe_seconds <= timeframe_ceiling_secs && key.timestamp_ms < cutoff_ms)
                });
                Ok((before - t.ohlc.len()) as u64)
            }
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.tables().closed = true;
        Ok(())
    }
}
