//! The dispatcher worker thread.
//!
//! Sole owner of the pending queues, the tick stores and the backend. Wakes on
//! every request or after `wake_interval`, applies the batching policy, and on
//! shutdown drains everything before closing the backend.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tickvault_core::domain::{
    AssetRecord, LiquidationRecord, MarketInfoRecord, MarketKey, OhlcRecord, UserTradeRecord,
};
use tickvault_core::retention::RetentionPolicy;
use tickvault_core::shard::{ShardLayout, TickFormat, TickShardStore};

use super::pending::PendingQueue;
use super::request::Request;
use super::DispatchError;
use crate::backend::{BackendError, DeleteCriteria, EntityKind, RelationalBackend, Row, Rows};
use crate::config::StoreConfig;
use crate::stats::DispatcherStats;

/// Upper bound on requests handled between two policy checks.
const MAX_REQUESTS_PER_CYCLE: usize = 4096;

pub(crate) struct Worker {
    rx: Receiver<Request>,
    backend: Box<dyn RelationalBackend>,
    stats: Arc<DispatcherStats>,

    layout: ShardLayout,
    tick_format: TickFormat,
    tick_flush_interval: Duration,
    continuous: bool,
    ticks: BTreeMap<MarketKey, TickShardStore>,
    tick_retry_not_before: Option<Instant>,

    ohlc: PendingQueue<OhlcRecord>,
    assets: PendingQueue<AssetRecord>,
    liquidations: PendingQueue<LiquidationRecord>,
    market_info: PendingQueue<MarketInfoRecord>,
    user_trades: PendingQueue<UserTradeRecord>,
    deletes: PendingQueue<DeleteCriteria>,

    retention: RetentionPolicy,
    cleanup_interval: Duration,
    next_cleanup: Option<Instant>,

    wake_interval: Duration,
    retry_backoff: Duration,
    drain_max_attempts: u32,
    drain_poll: Duration,
    pending_high_water: usize,
    above_high_water: bool,
}

impl Worker {
    pub(crate) fn new(
        config: &StoreConfig,
        retention: RetentionPolicy,
        backend: Box<dyn RelationalBackend>,
        rx: Receiver<Request>,
        stats: Arc<DispatcherStats>,
    ) -> Self {
        let now = Instant::now();
        let (entity_size, entity_interval) =
            (config.entity_batch_size, config.entity_flush_interval());
        Self {
            rx,
            backend,
            stats,
            layout: config.layout(),
            tick_format: config.tick_format,
            tick_flush_interval: config.tick_flush_interval(),
            continuous: config.continuous_ticks,
            ticks: BTreeMap::new(),
            tick_retry_not_before: None,
            ohlc: PendingQueue::new(config.ohlc_batch_size, config.ohlc_flush_interval(), now),
            assets: PendingQueue::new(entity_size, entity_interval, now),
            liquidations: PendingQueue::new(entity_size, entity_interval, now),
            market_info: PendingQueue::new(entity_size, entity_interval, now),
            user_trades: PendingQueue::new(entity_size, entity_interval, now),
            // Deletes are due as soon as they are queued.
            deletes: PendingQueue::new(1, Duration::ZERO, now),
            retention,
            cleanup_interval: config.cleanup_interval(),
            next_cleanup: config
                .auto_cleanup
                .then(|| now + config.cleanup_interval()),
            wake_interval: config.wake_interval(),
            retry_backoff: config.retry_backoff(),
            drain_max_attempts: config.drain_max_attempts.max(1),
            drain_poll: config.drain_poll(),
            pending_high_water: config.pending_high_water,
            above_high_water: false,
        }
    }

    pub(crate) fn run(mut self) {
        info!("dispatcher started (backend: {})", self.backend.name());
        'outer: loop {
            let mut next = match self.rx.recv_timeout(self.wake_interval) {
                Ok(request) => Some(request),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let mut handled = 0;
            while let Some(request) = next {
                if !self.handle(request) {
                    break 'outer;
                }
                handled += 1;
                if handled >= MAX_REQUESTS_PER_CYCLE {
                    break;
                }
                next = self.rx.try_recv().ok();
            }
            self.cycle(Instant::now());
        }
        self.drain();
        info!("dispatcher stopped");
    }

    /// Returns false on shutdown.
    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::Ticks { key, ticks } => self.tick_store(key).store_batch(ticks),
            Request::Rows(rows) => self.accept(rows),
            Request::Select { query, reply } => {
                // Read-after-write: earlier inserts of this kind get one attempt first.
                self.flush_kind(query.kind(), Instant::now(), true);
                let result = self.backend.select(&query).map_err(DispatchError::from);
                let _ = reply.send(result);
            }
            Request::Cleanup { now_ms, reply } => {
                let result = self.cleanup(now_ms, Instant::now());
                let _ = reply.send(result.map_err(DispatchError::from));
            }
            Request::SetContinuous(continuous) => {
                self.continuous = continuous;
                for store in self.ticks.values() {
                    store.set_continuous(continuous);
                }
            }
            Request::Flush { reply } => {
                self.flush_all(Instant::now(), true, !self.continuous);
                let _ = reply.send(());
            }
            Request::Shutdown => return false,
        }
        true
    }

    fn tick_store(&mut self, key: MarketKey) -> &TickShardStore {
        let (layout, format, interval, continuous) = (
            &self.layout,
            self.tick_format,
            self.tick_flush_interval,
            self.continuous,
        );
        self.ticks.entry(key).or_insert_with_key(|key| {
            debug!("{key}: opening tick store");
            TickShardStore::new(layout.clone(), key.clone(), format)
                .with_flush_interval(interval)
                .with_continuous(continuous)
        })
    }

    fn accept(&mut self, rows: Rows) {
        match rows {
            Rows::Ohlc(batch) => self.ohlc.extend(batch),
            Rows::Asset(batch) => self.assets.extend(batch),
            Rows::Liquidation(batch) => self.liquidations.extend(batch),
            Rows::MarketInfo(batch) => self.market_info.extend(batch),
            Rows::UserTrade(batch) => self.user_trades.extend(batch),
        }
    }

    /// Timer-driven pass: flush what is due, run periodic cleanup, publish gauges.
    fn cycle(&mut self, now: Instant) {
        self.flush_all(now, false, !self.continuous);

        if let Some(at) = self.next_cleanup {
            if now >= at {
                self.next_cleanup = Some(now + self.cleanup_interval);
                if let Err(e) = self.cleanup(Utc::now().timestamp_millis(), now) {
                    warn!("scheduled retention cleanup failed, will retry: {e}");
                }
            }
        }

        self.publish_pending();
    }

    fn flush_all(&mut self, now: Instant, force: bool, close_ticks: bool) {
        for kind in EntityKind::ALL {
            self.flush_kind(kind, now, force);
        }
        if !self.deletes.is_empty() && (force || self.deletes.is_due(now)) {
            if let Err(e) = self.flush_deletes(now) {
                debug!("pending deletes still failing: {e}");
            }
        }
        self.flush_ticks(now, force, close_ticks);
    }

    fn flush_kind(&mut self, kind: EntityKind, now: Instant, force: bool) -> bool {
        let backend = self.backend.as_mut();
        let stats = &*self.stats;
        let backoff = self.retry_backoff;
        match kind {
            EntityKind::Ohlc => flush_queue(&mut self.ohlc, backend, stats, backoff, now, force),
            EntityKind::Asset => flush_queue(&mut self.assets, backend, stats, backoff, now, force),
            EntityKind::Liquidation => {
                flush_queue(&mut self.liquidations, backend, stats, backoff, now, force)
            }
            EntityKind::MarketInfo => {
                flush_queue(&mut self.market_info, backend, stats, backoff, now, force)
            }
            EntityKind::UserTrade => {
                flush_queue(&mut self.user_trades, backend, stats, backoff, now, force)
            }
        }
    }

    fn flush_ticks(&mut self, now: Instant, force: bool, close_after: bool) -> bool {
        if !force && self.tick_retry_not_before.is_some_and(|t| now < t) {
            return false;
        }
        let mut ok = true;
        for store in self.ticks.values() {
            if !store.has_data() || !(force || store.can_flush(now)) {
                continue;
            }
            match store.flush(close_after) {
                Ok(report) => self.stats.add_ticks_written(report.written),
                Err(_) => {
                    // The store already logged and requeued the unwritten suffix.
                    self.stats.record_tick_failure();
                    ok = false;
                }
            }
        }
        self.tick_retry_not_before = (!ok).then(|| now + self.retry_backoff);
        ok
    }

    /// Queue one delete per retention tier and run them.
    fn cleanup(&mut self, now_ms: i64, now: Instant) -> Result<u64, BackendError> {
        let targets = self.retention.cleanup_targets(now_ms);
        if targets.is_empty() {
            return Ok(0);
        }
        for target in &targets {
            info!(
                "retention cleanup: timeframe <= {}s older than {}",
                target.timeframe_ceiling_secs, target.cutoff_ms
            );
        }
        self.deletes
            .extend(targets.into_iter().map(DeleteCriteria::from));
        self.flush_deletes(now)
    }

    /// Run queued deletes in order. A failure puts the failing criteria and
    /// everything after it back for the next attempt.
    fn flush_deletes(&mut self, now: Instant) -> Result<u64, BackendError> {
        let batch = self.deletes.take();
        let mut deleted = 0;
        for (i, criteria) in batch.iter().enumerate() {
            match self.backend.delete(criteria) {
                Ok(n) => deleted += n,
                Err(e) => {
                    self.stats.record_backend_failure();
                    let left = batch.len() - i;
                    if e.is_transient() {
                        warn!("delete failed, {left} criteria requeued: {e}");
                    } else {
                        error!("delete {criteria:?} rejected, {left} criteria requeued: {e}");
                    }
                    self.deletes.requeue_front(batch[i..].to_vec());
                    self.deletes.mark_failed(now, self.retry_backoff);
                    self.stats.add_deleted(deleted);
                    return Err(e);
                }
            }
        }
        self.deletes.mark_flushed(now);
        self.stats.add_deleted(deleted);
        if deleted > 0 {
            info!("retention cleanup removed {deleted} row(s)");
        }
        Ok(deleted)
    }

    fn pending_rows(&self) -> usize {
        self.ohlc.len()
            + self.assets.len()
            + self.liquidations.len()
            + self.market_info.len()
            + self.user_trades.len()
            + self.deletes.len()
    }

    fn pending_ticks(&self) -> usize {
        self.ticks.values().map(TickShardStore::pending_len).sum()
    }

    fn publish_pending(&mut self) {
        let (rows, ticks) = (self.pending_rows(), self.pending_ticks());
        self.stats.set_pending(rows, ticks);
        let above = rows + ticks > self.pending_high_water;
        if above && !self.above_high_water {
            warn!(
                "pending data above high-water mark ({} rows, {} ticks > {}); backend may be down",
                rows, ticks, self.pending_high_water
            );
        }
        self.above_high_water = above;
    }

    /// Force-flush until nothing is pending or attempts run out, then close.
    fn drain(&mut self) {
        // Requests that raced with the shutdown signal.
        while let Ok(request) = self.rx.try_recv() {
            self.handle(request);
        }

        info!(
            "draining {} row(s) and {} tick(s)",
            self.pending_rows(),
            self.pending_ticks()
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.flush_all(Instant::now(), true, true);
            let (rows, ticks) = (self.pending_rows(), self.pending_ticks());
            if rows == 0 && ticks == 0 {
                info!("drain complete after {attempt} attempt(s)");
                break;
            }
            if attempt >= self.drain_max_attempts {
                error!(
                    "drain gave up after {attempt} attempt(s): {rows} row(s) and {ticks} tick(s) not persisted"
                );
                break;
            }
            debug!("drain attempt {attempt}: {rows} row(s) and {ticks} tick(s) left");
            thread::sleep(self.drain_poll);
        }

        for store in self.ticks.values() {
            store.close();
        }
        self.publish_pending();
        if let Err(e) = self.backend.close() {
            warn!("closing backend {} failed: {e}", self.backend.name());
        }
    }
}

/// One insert attempt for a queue. `force` ignores thresholds and backoff.
/// Returns false if the attempt failed.
fn flush_queue<T: Row>(
    queue: &mut PendingQueue<T>,
    backend: &mut dyn RelationalBackend,
    stats: &DispatcherStats,
    backoff: Duration,
    now: Instant,
    force: bool,
) -> bool {
    if queue.is_empty() || !(force || queue.is_due(now)) {
        return true;
    }
    let batch = queue.take();
    let count = batch.len();
    let rows = T::into_rows(batch);
    match backend.insert(&rows) {
        Ok(()) => {
            queue.mark_flushed(now);
            stats.add_persisted(count);
            debug!("{}: persisted {count} row(s)", T::KIND);
            true
        }
        Err(e) => {
            stats.record_backend_failure();
            if e.is_transient() {
                warn!("{}: insert of {count} row(s) failed, requeued: {e}", T::KIND);
            } else {
                stats.add_rejected(count);
                error!("{}: insert of {count} row(s) rejected, requeued: {e}", T::KIND);
            }
            queue.requeue_front(T::from_rows(rows).unwrap_or_default());
            queue.mark_failed(now, backoff);
            false
        }
    }
}
