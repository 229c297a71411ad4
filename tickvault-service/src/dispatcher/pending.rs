//! Worker-owned pending queue for one entity kind.

use std::mem;
use std::time::{Duration, Instant};

pub(crate) struct PendingQueue<T> {
    items: Vec<T>,
    batch_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
    retry_not_before: Option<Instant>,
}

impl<T> PendingQueue<T> {
    pub(crate) fn new(batch_size: usize, flush_interval: Duration, now: Instant) -> Self {
        Self {
            items: Vec::new(),
            batch_size: batch_size.max(1),
            flush_interval,
            last_flush: now,
            retry_not_before: None,
        }
    }

    pub(crate) fn extend(&mut self, rows: impl IntoIterator<Item = T>) {
        self.items.extend(rows);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn in_backoff(&self, now: Instant) -> bool {
        self.retry_not_before.is_some_and(|t| now < t)
    }

    /// Size threshold reached or flush interval elapsed, and not backing off.
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        !self.items.is_empty()
            && !self.in_backoff(now)
            && (self.items.len() >= self.batch_size
                || now.saturating_duration_since(self.last_flush) >= self.flush_interval)
    }

    /// Swap-and-clear.
    pub(crate) fn take(&mut self) -> Vec<T> {
        mem::take(&mut self.items)
    }

    /// Put a failed batch back ahead of anything queued since it was taken.
    pub(crate) fn requeue_front(&mut self, mut batch: Vec<T>) {
        batch.append(&mut self.items);
        self.items = batch;
    }

    pub(crate) fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
        self.retry_not_before = None;
    }

    pub(crate) fn mark_failed(&mut self, now: Instant, backoff: Duration) {
        self.retry_not_before = Some(now + backoff);
    }
}
