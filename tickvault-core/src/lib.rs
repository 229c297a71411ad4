//! TickVault Core: record types and the on-disk tick store.
//!
//! This crate contains the storage primitives the persistence service builds on:
//! - Record types (ticks, OHLC bars, assets, liquidations, market info, user trades)
//! - Month-sharded tick store with dual binary/text encoding
//! - Stream cursor with binary-search seek and month rollover
//! - First/last record finders
//! - Tiered OHLC retention policy

pub mod domain;
pub mod error;
pub mod retention;
pub mod shard;

pub use domain::{Direction, MarketKey, OhlcRecord, TickRecord};
pub use error::ShardError;
pub use retention::{CleanupTarget, RetentionPolicy, RetentionTier};
pub use shard::{
    FirstRecordFinder, LastRecordFinder, ShardLayout, ShardMonth, TickFormat, TickShardStore,
    TickStreamCursor,
};
