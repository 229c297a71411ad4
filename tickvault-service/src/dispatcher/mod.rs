//! Write-behind persistence dispatcher.
//!
//! A [`Dispatcher`] is an explicit handle over one worker thread. Producers
//! call `enqueue_*`, which only sends a typed request down an mpsc channel;
//! the worker owns every pending queue, every tick store and the backend, so
//! no producer ever waits on I/O.
//!
//! Guarantees:
//! - Per-kind enqueue order is flush order; a failed batch is retried before newer rows.
//! - A `load_*` call observes every insert of its kind enqueued before it
//!   (the worker force-flushes that kind first, one attempt).
//! - `shutdown` drains all queues and tick stores before closing the backend.

mod pending;
mod request;
mod worker;

use chrono::Utc;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use tickvault_core::domain::{
    AssetRecord, LiquidationRecord, MarketInfoRecord, MarketKey, OhlcRecord, TickRecord,
    UserTradeRecord, MIN_PERSISTED_TIMEFRAME_SECS,
};
use tickvault_core::error::ShardError;
use tickvault_core::shard::{FirstRecordFinder, LastRecordFinder, ShardLayout, TickStreamCursor};

use crate::backend::{open_backend, BackendError, Query, RelationalBackend, Row};
use crate::config::{ConfigError, StoreConfig};
use crate::stats::{DispatcherStats, StatsSnapshot};
use request::Request;
use worker::Worker;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is stopped")]
    Stopped,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Shard(#[from] ShardError),
    #[error("dispatcher worker exited before replying")]
    ReplyLost,
}

/// Handle to a running persistence worker. Share it behind an `Arc`.
pub struct Dispatcher {
    tx: Sender<Request>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<DispatcherStats>,
    layout: ShardLayout,
    cursor_buffer_size: usize,
}

impl Dispatcher {
    /// Validate the configuration, open the configured backend and start the worker.
    pub fn start(config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend = open_backend(&config.backend)?;
        Self::start_with_backend(config, backend)
    }

    /// Start with a caller-supplied backend adapter. The `[backend]` table is
    /// not consulted.
    pub fn start_with_backend(
        config: StoreConfig,
        backend: Box<dyn RelationalBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate_store()?;
        let retention = config.retention_policy()?;
        let stats = Arc::new(DispatcherStats::default());
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(&config, retention, backend, rx, Arc::clone(&stats));

        let handle = thread::Builder::new()
            .name("tickvault-dispatcher".into())
            .spawn(move || worker.run())
            .expect("failed to spawn dispatcher thread");

        info!("dispatcher ticks at {}", config.tick_root.display());
        Ok(Self {
            tx,
            running: AtomicBool::new(true),
            worker: Mutex::new(Some(handle)),
            stats,
            layout: config.layout(),
            cursor_buffer_size: config.cursor_buffer_size,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn send(&self, request: Request) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Stopped);
        }
        self.tx.send(request).map_err(|_| DispatchError::Stopped)
    }

    fn call<T>(
        &self,
        make: impl FnOnce(Sender<Result<T, DispatchError>>) -> Request,
    ) -> Result<T, DispatchError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(make(reply_tx))?;
        reply_rx.recv().map_err(|_| DispatchError::ReplyLost)?
    }

    fn select<T: Row>(&self, query: Query) -> Result<Vec<T>, DispatchError> {
        let rows = self.call(|reply| Request::Select { query, reply })?;
        let kind = rows.kind();
        T::from_rows(rows).ok_or_else(|| {
            DispatchError::Backend(BackendError::Rejected(format!(
                "backend answered a {} query with {kind} rows",
                T::KIND
            )))
        })
    }

    fn enqueue_rows<T: Row>(&self, rows: Vec<T>) -> Result<(), DispatchError> {
        if rows.is_empty() {
            return Ok(());
        }
        let count = rows.len();
        self.send(Request::Rows(T::into_rows(rows)))?;
        self.stats.add_enqueued(count);
        Ok(())
    }

    // ── Ticks ────────────────────────────────────────────────────────

    pub fn enqueue_tick(&self, key: MarketKey, tick: TickRecord) -> Result<(), DispatchError> {
        self.enqueue_ticks(key, vec![tick])
    }

    pub fn enqueue_ticks(
        &self,
        key: MarketKey,
        ticks: Vec<TickRecord>,
    ) -> Result<(), DispatchError> {
        if ticks.is_empty() {
            return Ok(());
        }
        let count = ticks.len();
        self.send(Request::Ticks { key, ticks })?;
        self.stats.add_ticks_enqueued(count);
        Ok(())
    }

    /// Switch every tick store between continuous (bulk import) and interval flushing.
    pub fn set_continuous_ticks(&self, continuous: bool) -> Result<(), DispatchError> {
        self.send(Request::SetContinuous(continuous))
    }

    /// Replay cursor over the tick store, independent of the worker.
    ///
    /// Ticks still pending in the worker are not visible; call
    /// [`flush_now`](Self::flush_now) first when that matters.
    pub fn create_tick_stream_cursor(
        &self,
        key: MarketKey,
        from_ms: i64,
        to_ms: i64,
        prefer_binary: bool,
    ) -> TickStreamCursor {
        TickStreamCursor::new(
            self.layout.clone(),
            key,
            from_ms,
            to_ms,
            self.cursor_buffer_size,
            prefer_binary,
        )
    }

    pub fn get_first_tick(&self, key: MarketKey) -> Result<Option<TickRecord>, DispatchError> {
        Ok(FirstRecordFinder::new(self.layout.clone(), key, true).find()?)
    }

    pub fn get_last_tick(&self, key: MarketKey) -> Result<Option<TickRecord>, DispatchError> {
        Ok(LastRecordFinder::new(self.layout.clone(), key, true).find(Utc::now())?)
    }

    // ── OHLC ─────────────────────────────────────────────────────────

    pub fn enqueue_ohlc(&self, bar: OhlcRecord) -> Result<(), DispatchError> {
        self.enqueue_ohlcs(vec![bar])
    }

    /// Bars below the minimum persisted timeframe are dropped here.
    pub fn enqueue_ohlcs(&self, bars: Vec<OhlcRecord>) -> Result<(), DispatchError> {
        let total = bars.len();
        let kept: Vec<_> = bars
            .into_iter()
            .filter(OhlcRecord::is_persistable)
            .collect();
        let dropped = total - kept.len();
        if dropped > 0 {
            debug!(
                "dropped {dropped} OHLC row(s) with timeframe < {MIN_PERSISTED_TIMEFRAME_SECS}s"
            );
            self.stats.add_dropped(dropped);
        }
        self.enqueue_rows(kept)
    }

    pub fn load_ohlc(
        &self,
        broker_id: &str,
        market_id: &str,
        timeframe_seconds: u32,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<OhlcRecord>, DispatchError> {
        self.select(Query::OhlcRange {
            broker_id: broker_id.to_string(),
            market_id: market_id.to_string(),
            timeframe_seconds,
            from_ms,
            to_ms,
        })
    }

    /// The latest `limit` bars, strictly before `before_ms` when given, oldest first.
    pub fn load_ohlc_last_n(
        &self,
        broker_id: &str,
        market_id: &str,
        timeframe_seconds: u32,
        limit: usize,
        before_ms: Option<i64>,
    ) -> Result<Vec<OhlcRecord>, DispatchError> {
        self.select(Query::OhlcLastN {
            broker_id: broker_id.to_string(),
            market_id: market_id.to_string(),
            timeframe_seconds,
            limit,
            before_ms,
        })
    }

    /// Delete OHLC bars past their retention tier, as of `now_ms`.
    pub fn cleanup_ohlc(&self, now_ms: i64) -> Result<u64, DispatchError> {
        self.call(|reply| Request::Cleanup { now_ms, reply })
    }

    // ── Other entities ───────────────────────────────────────────────

    pub fn enqueue_asset(&self, asset: AssetRecord) -> Result<(), DispatchError> {
        self.enqueue_rows(vec![asset])
    }

    pub fn enqueue_assets(&self, assets: Vec<AssetRecord>) -> Result<(), DispatchError> {
        self.enqueue_rows(assets)
    }

    pub fn enqueue_liquidation(&self, liquidation: LiquidationRecord) -> Result<(), DispatchError> {
        self.enqueue_rows(vec![liquidation])
    }

    pub fn enqueue_liquidations(
        &self,
        liquidations: Vec<LiquidationRecord>,
    ) -> Result<(), DispatchError> {
        self.enqueue_rows(liquidations)
    }

    pub fn enqueue_market_info(&self, info: MarketInfoRecord) -> Result<(), DispatchError> {
        self.enqueue_rows(vec![info])
    }

    pub fn enqueue_market_infos(&self, infos: Vec<MarketInfoRecord>) -> Result<(), DispatchError> {
        self.enqueue_rows(infos)
    }

    pub fn enqueue_user_trade(&self, trade: UserTradeRecord) -> Result<(), DispatchError> {
        self.enqueue_rows(vec![trade])
    }

    pub fn enqueue_user_trades(&self, trades: Vec<UserTradeRecord>) -> Result<(), DispatchError> {
        self.enqueue_rows(trades)
    }

    pub fn load_assets(
        &self,
        broker_id: &str,
        account_id: &str,
    ) -> Result<Vec<AssetRecord>, DispatchError> {
        self.select(Query::AssetsByAccount {
            broker_id: broker_id.to_string(),
            account_id: account_id.to_string(),
        })
    }

    /// One market, or every market of the broker.
    pub fn load_market_info(
        &self,
        broker_id: &str,
        market_id: Option<&str>,
    ) -> Result<Vec<MarketInfoRecord>, DispatchError> {
        self.select(Query::MarketInfo {
            broker_id: broker_id.to_string(),
            market_id: market_id.map(str::to_string),
        })
    }

    pub fn load_user_trades(
        &self,
        broker_id: &str,
        account_id: &str,
        strategy_id: &str,
    ) -> Result<Vec<UserTradeRecord>, DispatchError> {
        self.select(Query::UserTradesByStrategy {
            broker_id: broker_id.to_string(),
            account_id: account_id.to_string(),
            strategy_id: strategy_id.to_string(),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Force one flush attempt of everything pending; returns once the worker made it.
    pub fn flush_now(&self) -> Result<(), DispatchError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Request::Flush { reply: reply_tx })?;
        reply_rx.recv().map_err(|_| DispatchError::ReplyLost)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting work, drain, close the backend and join the worker.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Request::Shutdown);
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("dispatcher worker panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
