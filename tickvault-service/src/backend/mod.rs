//! Relational backend interface.
//!
//! The dispatcher never builds SQL. It hands the backend typed row batches,
//! typed queries and typed delete criteria. Adapters are selected by
//! configuration at start.

pub mod memory;

pub use memory::InMemoryBackend;

use std::fmt;
use thiserror::Error;

use tickvault_core::domain::{
    AssetRecord, LiquidationRecord, MarketInfoRecord, OhlcRecord, UserTradeRecord,
};
use tickvault_core::retention::CleanupTarget;

use crate::config::{BackendConfig, BackendKind, ConfigError};

/// Entity kinds persisted through the backend. Ticks go to the shard store instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Ohlc,
    Asset,
    Liquidation,
    MarketInfo,
    UserTrade,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Ohlc,
        EntityKind::Asset,
        EntityKind::Liquidation,
        EntityKind::MarketInfo,
        EntityKind::UserTrade,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Ohlc => "ohlc",
            EntityKind::Asset => "asset",
            EntityKind::Liquidation => "liquidation",
            EntityKind::MarketInfo => "market_info",
            EntityKind::UserTrade => "user_trade",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed batch of rows of one kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Ohlc(Vec<OhlcRecord>),
    Asset(Vec<AssetRecord>),
    Liquidation(Vec<LiquidationRecord>),
    MarketInfo(Vec<MarketInfoRecord>),
    UserTrade(Vec<UserTradeRecord>),
}

impl Rows {
    pub fn kind(&self) -> EntityKind {
        match self {
            Rows::Ohlc(_) => EntityKind::Ohlc,
            Rows::Asset(_) => EntityKind::Asset,
            Rows::Liquidation(_) => EntityKind::Liquidation,
            Rows::MarketInfo(_) => EntityKind::MarketInfo,
            Rows::UserTrade(_) => EntityKind::UserTrade,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Rows::Ohlc(v) => v.len(),
            Rows::Asset(v) => v.len(),
            Rows::Liquidation(v) => v.len(),
            Rows::MarketInfo(v) => v.len(),
            Rows::UserTrade(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty batch of the given kind.
    pub fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Ohlc => Rows::Ohlc(Vec::new()),
            EntityKind::Asset => Rows::Asset(Vec::new()),
            EntityKind::Liquidation => Rows::Liquidation(Vec::new()),
            EntityKind::MarketInfo => Rows::MarketInfo(Vec::new()),
            EntityKind::UserTrade => Rows::UserTrade(Vec::new()),
        }
    }
}

/// Record types that travel as [`Rows`].
pub trait Row: Clone + Send + 'static {
    const KIND: EntityKind;

    fn into_rows(batch: Vec<Self>) -> Rows;

    /// Inverse of `into_rows`; `None` if the variant does not match.
    fn from_rows(rows: Rows) -> Option<Vec<Self>>;
}

macro_rules! impl_row {
    ($ty:ty, $variant:ident) => {
        impl Row for $ty {
            const KIND: EntityKind = EntityKind::$variant;

            fn into_rows(batch: Vec<Self>) -> Rows {
                Rows::$variant(batch)
            }

            fn from_rows(rows: Rows) -> Option<Vec<Self>> {
                match rows {
                    Rows::$variant(batch) => Some(batch),
                    _ => None,
                }
            }
        }
    };
}

impl_row!(OhlcRecord, Ohlc);
impl_row!(AssetRecord, Asset);
impl_row!(LiquidationRecord, Liquidation);
impl_row!(MarketInfoRecord, MarketInfo);
impl_row!(UserTradeRecord, UserTrade);

/// Typed read criteria.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Bars with `from_ms <= timestamp <= to_ms`, ascending.
    OhlcRange {
        broker_id: String,
        market_id: String,
        timeframe_seconds: u32,
        from_ms: i64,
        to_ms: i64,
    },
    /// The latest `limit` bars strictly before `before_ms` (or overall), ascending.
    OhlcLastN {
        broker_id: String,
        market_id: String,
        timeframe_seconds: u32,
        limit: usize,
        before_ms: Option<i64>,
    },
    AssetsByAccount {
        broker_id: String,
        account_id: String,
    },
    /// One market, or every market of the broker when `market_id` is `None`.
    MarketInfo {
        broker_id: String,
        market_id: Option<String>,
    },
    UserTradesByStrategy {
        broker_id: String,
        account_id: String,
        strategy_id: String,
    },
}

impl Query {
    pub fn kind(&self) -> EntityKind {
        match self {
            Query::OhlcRange { .. } | Query::OhlcLastN { .. } => EntityKind::Ohlc,
            Query::AssetsByAccount { .. } => EntityKind::Asset,
            Query::MarketInfo { .. } => EntityKind::MarketInfo,
            Query::UserTradesByStrategy { .. } => EntityKind::UserTrade,
        }
    }
}

/// Typed bulk-delete criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteCriteria {
    /// `timeframe <= timeframe_ceiling_secs AND timestamp < cutoff_ms`.
    OhlcOlderThan {
        timeframe_ceiling_secs: u32,
        cutoff_ms: i64,
    },
}

impl DeleteCriteria {
    pub fn kind(&self) -> EntityKind {
        match self {
            DeleteCriteria::OhlcOlderThan { .. } => EntityKind::Ohlc,
        }
    }
}

impl From<CleanupTarget> for DeleteCriteria {
    fn from(target: CleanupTarget) -> Self {
        DeleteCriteria::OhlcOlderThan {
            timeframe_ceiling_secs: target.timeframe_ceiling_secs,
            cutoff_ms: target.cutoff_ms,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Connection lost, timeout.
    #[error("transient backend error: {0}")]
    Transient(String),
    /// The backend refused the batch. The dispatcher still keeps the rows
    /// and retries them, but reports the refusal at error level.
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("backend is closed")]
    Closed,
}

impl BackendError {
    /// Expected to clear up on its own; anything else needs an operator.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Closed)
    }
}

/// Storage the dispatcher persists entity rows to.
///
/// Called only from the dispatcher worker thread, so implementations need
/// `Send` but not `Sync`. `insert` must be an upsert on each kind's key
/// (for liquidations, [`tickvault_core::domain::LiquidationKey`] covers
/// every field) so that a retried batch is applied once logically.
pub trait RelationalBackend: Send {
    fn name(&self) -> &str;

    fn insert(&mut self, rows: &Rows) -> Result<(), BackendError>;

    fn select(&mut self, query: &Query) -> Result<Rows, BackendError>;

    /// Returns the number of deleted rows.
    fn delete(&mut self, criteria: &DeleteCriteria) -> Result<u64, BackendError>;

    fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Build the adapter named by the configuration.
///
/// Only the in-memory adapter ships with the crate. SQL kinds validate their
/// credentials and then report [`ConfigError::AdapterUnavailable`].
pub fn open_backend(config: &BackendConfig) -> Result<Box<dyn RelationalBackend>, ConfigError> {
    match config.validate()? {
        BackendKind::Memory => Ok(Box::new(InMemoryBackend::new())),
        kind => Err(ConfigError::AdapterUnavailable(kind.as_str().to_string())),
    }
}
