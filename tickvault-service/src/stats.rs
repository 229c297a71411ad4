//! Dispatcher counters, shared between the worker and the handle.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatcherStats {
    rows_enqueued: AtomicU64,
    rows_persisted: AtomicU64,
    rows_rejected: AtomicU64,
    rows_dropped: AtomicU64,
    ticks_enqueued: AtomicU64,
    ticks_written: AtomicU64,
    backend_failures: AtomicU64,
    tick_failures: AtomicU64,
    rows_deleted: AtomicU64,
    pending_rows: AtomicU64,
    pending_ticks: AtomicU64,
}

/// Point-in-time copy of [`DispatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rows_enqueued: u64,
    pub rows_persisted: u64,
    /// Rows in insert attempts the backend rejected. They stay queued and
    /// are retried like any other failure.
    pub rows_rejected: u64,
    /// OHLC rows below the minimum persisted timeframe.
    pub rows_dropped: u64,
    pub ticks_enqueued: u64,
    pub ticks_written: u64,
    pub backend_failures: u64,
    pub tick_failures: u64,
    pub rows_deleted: u64,
    /// Rows waiting in the worker queues at the end of its last cycle.
    pub pending_rows: u64,
    pub pending_ticks: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rows_enqueued: self.rows_enqueued.load(Ordering::Relaxed),
            rows_persisted: self.rows_persisted.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            ticks_enqueued: self.ticks_enqueued.load(Ordering::Relaxed),
            ticks_written: self.ticks_written.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            pending_rows: self.pending_rows.load(Ordering::Relaxed),
            pending_ticks: self.pending_ticks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add_enqueued(&self, n: usize) {
        self.rows_enqueued.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_persisted(&self, n: usize) {
        self.rows_persisted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_rejected(&self, n: usize) {
        self.rows_rejected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: usize) {
        self.rows_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_ticks_enqueued(&self, n: usize) {
        self.ticks_enqueued.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_ticks_written(&self, n: usize) {
        self.ticks_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tick_failure(&self) {
        self.tick_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_deleted(&self, n: u64) {
        self.rows_deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, rows: usize, ticks: usize) {
        self.pending_rows.store(rows as u64, Ordering::Relaxed);
        self.pending_ticks.store(ticks as u64, Ordering::Relaxed);
    }
}
