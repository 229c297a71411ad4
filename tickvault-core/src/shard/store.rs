//! Per-market append store.
//!
//! Producers call [`TickShardStore::store`], which only appends to an in-memory
//! buffer under a short lock. A single flusher calls [`TickShardStore::flush`],
//! which swaps the buffer out and appends it to the month shard(s) on disk.
//!
//! A failed append never leaves a partial record behind: each month run is
//! written as one block and the file is truncated back to its previous length
//! on error, after which the unwritten suffix of the batch goes back to the
//! front of the pending buffer.

use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::codec::{encode_binary_into, encode_text_into};
use super::layout::{ShardLayout, TickFormat};
use super::month::ShardMonth;
use crate::domain::{MarketKey, TickRecord};
use crate::error::ShardError;

/// Default minimum delay between two interval-based flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one flush call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub months: usize,
}

/// Append-only tick store for one (broker, market) pair.
pub struct TickShardStore {
    key: MarketKey,
    layout: ShardLayout,
    format: TickFormat,
    flush_interval: Duration,
    continuous: AtomicBool,
    pending: Mutex<Vec<TickRecord>>,
    last_flush: Mutex<Instant>,
    writer: Mutex<ShardWriter>,
}

impl TickShardStore {
    pub fn new(layout: ShardLayout, key: MarketKey, format: TickFormat) -> Self {
        Self {
            key,
            layout,
            format,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            continuous: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            writer: Mutex::new(ShardWriter::default()),
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Continuous mode flushes on every cycle (bulk import / fetch tooling).
    pub fn with_continuous(self, continuous: bool) -> Self {
        self.set_continuous(continuous);
        self
    }

    pub fn set_continuous(&self, continuous: bool) {
        self.continuous.store(continuous, Ordering::Relaxed);
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous.load(Ordering::Relaxed)
    }

    pub fn key(&self) -> &MarketKey {
        &self.key
    }

    pub fn format(&self) -> TickFormat {
        self.format
    }

    /// Queue one tick. No disk I/O.
    pub fn store(&self, tick: TickRecord) {
        lock(&self.pending).push(tick);
    }

    /// Queue a batch of ticks, preserving their order. No disk I/O.
    pub fn store_batch(&self, ticks: impl IntoIterator<Item = TickRecord>) {
        lock(&self.pending).extend(ticks);
    }

    pub fn has_data(&self) -> bool {
        !lock(&self.pending).is_empty()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// True in continuous mode, or once the flush interval has elapsed.
    pub fn can_flush(&self, now: Instant) -> bool {
        self.is_continuous()
            || now.saturating_duration_since(*lock(&self.last_flush)) >= self.flush_interval
    }

    /// Month of the currently open shard, if any.
    pub fn current_month(&self) -> Option<ShardMonth> {
        lock(&self.writer).month
    }

    /// Write every pending tick to its month shard.
    ///
    /// On failure the unwritten suffix is put back in front of anything
    /// queued meanwhile, and the error is returned. Records already written
    /// are not requeued.
    pub fn flush(&self, close_after: bool) -> Result<FlushReport, ShardError> {
        let batch = mem::take(&mut *lock(&self.pending));
        let mut writer = lock(&self.writer);
        let result = self.write_batch(&mut writer, &batch);
        *lock(&self.last_flush) = Instant::now();

        match result {
            Ok(report) => {
                if close_after {
                    writer.close();
                }
                if report.written > 0 {
                    debug!(
                        "{}: flushed {} ticks over {} month(s)",
                        self.key, report.written, report.months
                    );
                }
                Ok(report)
            }
            Err((written, err)) => {
                let unwritten = &batch[written..];
                warn!(
                    "{}: tick flush failed after {written} record(s), requeueing {}: {err}",
                    self.key,
                    unwritten.len()
                );
                // Reopen on the next attempt rather than trusting a handle that just failed.
                writer.close();
                let mut pending = lock(&self.pending);
                let newer = mem::take(&mut *pending);
                pending.reserve(unwritten.len() + newer.len());
                pending.extend_from_slice(unwritten);
                pending.extend(newer);
                Err(err)
            }
        }
    }

    /// Release file handles. Safe to call when none are open.
    pub fn close(&self) {
        lock(&self.writer).close();
    }

    /// Splits `batch` into consecutive same-month runs and appends each.
    /// On error returns how many records were durably written before it.
    fn write_batch(
        &self,
        writer: &mut ShardWriter,
        batch: &[TickRecord],
    ) -> Result<FlushReport, (usize, ShardError)> {
        let mut report = FlushReport::default();
        let mut start = 0;
        while start < batch.len() {
            let month = ShardMonth::from_timestamp_ms(batch[start].timestamp_ms);
            let end = start
                + batch[start..]
                    .iter()
                    .position(|t| ShardMonth::from_timestamp_ms(t.timestamp_ms) != month)
                    .unwrap_or(batch.len() - start);

            writer
                .append_run(&self.layout, &self.key, self.format, month, &batch[start..end])
                .map_err(|e| (start, e))?;

            report.written = end;
            report.months += 1;
            start = end;
        }
        Ok(report)
    }
}

impl Drop for TickShardStore {
    fn drop(&mut self) {
        if self.has_data() {
            if let Err(e) = self.flush(true) {
                warn!("{}: final flush on drop failed: {e}", self.key);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking producer must not wedge the flusher; the data is still valid.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Open handles for the current month. Owned by whoever flushes.
#[derive(Default)]
struct ShardWriter {
    month: Option<ShardMonth>,
    text: Option<ShardFile>,
    binary: Option<ShardFile>,
}

struct ShardFile {
    path: PathBuf,
    file: File,
}

impl ShardFile {
    fn open(path: PathBuf) -> Result<Self, ShardError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ShardError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ShardError::io(&path, e))?;
        Ok(Self { path, file })
    }

    fn len(&mut self) -> Result<u64, ShardError> {
        self.file
            .seek(SeekFrom::End(0))
            .map_err(|e| ShardError::io(&self.path, e))
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), ShardError> {
        self.file
            .write_all(bytes)
            .and_then(|_| self.file.flush())
            .map_err(|e| ShardError::io(&self.path, e))
    }

    fn truncate(&mut self, len: u64) {
        if let Err(e) = self.file.set_len(len) {
            warn!("could not roll back {} to {len} bytes: {e}", self.path.display());
        }
    }
}

impl ShardWriter {
    fn ensure_open(
        &mut self,
        layout: &ShardLayout,
        key: &MarketKey,
        format: TickFormat,
        month: ShardMonth,
    ) -> Result<(), ShardError> {
        if self.month != Some(month) {
            self.close();
        }
        if format.writes_binary() && self.binary.is_none() {
            self.binary = Some(ShardFile::open(layout.binary_path(key, month))?);
        }
        if format.writes_text() && self.text.is_none() {
            self.text = Some(ShardFile::open(layout.text_path(key, month))?);
        }
        self.month = Some(month);
        Ok(())
    }

    /// Append one same-month run to every enabled encoding, all or nothing.
    fn append_run(
        &mut self,
        layout: &ShardLayout,
        key: &MarketKey,
        format: TickFormat,
        month: ShardMonth,
        run: &[TickRecord],
    ) -> Result<(), ShardError> {
        self.ensure_open(layout, key, format, month)?;

        let mut binary_buf = Vec::new();
        let mut text_buf = Vec::new();
        if format.writes_binary() {
            encode_binary_into(run, &mut binary_buf);
        }
        if format.writes_text() {
            encode_text_into(run, &mut text_buf);
        }

        let binary_len = match self.binary.as_mut() {
            Some(f) => Some(f.len()?),
            None => None,
        };
        let text_len = match self.text.as_mut() {
            Some(f) => Some(f.len()?),
            None => None,
        };

        let result = self.append_encoded(&binary_buf, &text_buf);

        if result.is_err() {
            if let (Some(f), Some(len)) = (self.binary.as_mut(), binary_len) {
                f.truncate(len);
            }
            if let (Some(f), Some(len)) = (self.text.as_mut(), text_len) {
                f.truncate(len);
            }
        }
        result
    }

    fn append_encoded(&mut self, binary: &[u8], text: &[u8]) -> Result<(), ShardError> {
        if let Some(f) = self.binary.as_mut() {
            f.append(binary)?;
        }
        if let Some(f) = self.text.as_mut() {
            f.append(text)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.text = None;
        self.binary = None;
        self.month = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use crate::shard::codec::BINARY_RECORD_SIZE;
    use chrono::{TimeZone, Utc};

    fn key() -> MarketKey {
        MarketKey::new("paper", "EURUSD")
    }

    fn tick(ts: i64) -> TickRecord {
        TickRecord::new(ts, 1.1, 1.2, 1.15, 2.0, Direction::Neutral)
    }

    fn ts(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap().timestamp_millis()
    }

    #[test]
    fn store_is_buffered_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        let store = TickShardStore::new(layout.clone(), key(), TickFormat::Both);

        store.store(tick(ts(2024, 1, 5)));
        store.store_batch([tick(ts(2024, 1, 6)), tick(ts(2024, 1, 7))]);
        assert!(store.has_data());
        assert_eq!(store.pending_len(), 3);
        assert!(!layout.market_dir(&key()).exists());

        let report = store.flush(false).unwrap();
        assert_eq!(report, FlushReport { written: 3, months: 1 });
        assert!(!store.has_data());
        assert_eq!(store.current_month(), ShardMonth::new(2024, 1));

        let m = ShardMonth::new(2024, 1).unwrap();
        let bin_len = fs::metadata(layout.binary_path(&key(), m)).unwrap().len();
        assert_eq!(bin_len, 3 * BINARY_RECORD_SIZE as u64);
        let text = fs::read_to_string(layout.text_path(&key(), m)).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn flush_rotates_across_months() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        let store = TickShardStore::new(layout.clone(), key(), TickFormat::Binary);

        store.store_batch([
            tick(ts(2024, 1, 30)),
            tick(ts(2024, 1, 31)),
            tick(ts(2024, 2, 1)),
        ]);
        let report = store.flush(true).unwrap();
        assert_eq!(report.months, 2);
        assert_eq!(store.current_month(), None);

        let jan = layout.binary_path(&key(), ShardMonth::new(2024, 1).unwrap());
        let feb = layout.binary_path(&key(), ShardMonth::new(2024, 2).unwrap());
        assert_eq!(fs::metadata(jan).unwrap().len(), 2 * BINARY_RECORD_SIZE as u64);
        assert_eq!(fs::metadata(feb).unwrap().len(), BINARY_RECORD_SIZE as u64);
        assert!(!layout.text_path(&key(), ShardMonth::new(2024, 1).unwrap()).exists());
    }

    #[test]
    fn successive_flushes_append() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        let store = TickShardStore::new(layout.clone(), key(), TickFormat::Text);

        store.store(tick(ts(2024, 3, 1)));
        store.flush(true).unwrap();
        store.store(tick(ts(2024, 3, 2)));
        store.flush(false).unwrap();

        let text =
            fs::read_to_string(layout.text_path(&key(), ShardMonth::new(2024, 3).unwrap())).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn failed_flush_requeues_unwritten_suffix_in_front() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        let store = TickShardStore::new(layout.clone(), key(), TickFormat::Binary);
        store.store_batch([tick(ts(2024, 1, 10)), tick(ts(2024, 1, 11))]);
        store.flush(false).unwrap();

        // A directory squatting on February's shard path makes only that month unwritable.
        let feb = ShardMonth::new(2024, 2).unwrap();
        fs::create_dir_all(layout.binary_path(&key(), feb)).unwrap();

        store.store_batch([tick(ts(2024, 1, 12)), tick(ts(2024, 2, 1)), tick(ts(2024, 2, 2))]);
        let err = store.flush(false).unwrap_err();
        assert!(matches!(err, ShardError::Io { .. }));

        // January's record landed; the two February records are back in front.
        store.store(tick(ts(2024, 2, 3)));
        assert_eq!(store.pending_len(), 3);
        let jan = layout.binary_path(&key(), ShardMonth::new(2024, 1).unwrap());
        assert_eq!(fs::metadata(&jan).unwrap().len(), 3 * BINARY_RECORD_SIZE as u64);

        fs::remove_dir(layout.binary_path(&key(), feb)).unwrap();
        let report = store.flush(true).unwrap();
        assert_eq!(report.written, 3);
        assert_eq!(
            fs::metadata(layout.binary_path(&key(), feb)).unwrap().len(),
            3 * BINARY_RECORD_SIZE as u64
        );
        assert_eq!(fs::metadata(&jan).unwrap().len(), 3 * BINARY_RECORD_SIZE as u64);
    }

    #[test]
    fn can_flush_respects_interval_and_continuous_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = TickShardStore::new(ShardLayout::new(dir.path()), key(), TickFormat::Both)
            .with_flush_interval(Duration::from_secs(60));

        let now = Instant::now();
        assert!(!store.can_flush(now));
        assert!(store.can_flush(now + Duration::from_secs(61)));

        store.set_continuous(true);
        assert!(store.can_flush(now));
    }

    #[test]
    fn close_without_handles_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = TickShardStore::new(ShardLayout::new(dir.path()), key(), TickFormat::Both);
        store.close();
        store.close();
        assert_eq!(store.flush(true).unwrap(), FlushReport::default());
    }

    #[test]
    fn drop_flushes_pending_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        {
            let store = TickShardStore::new(layout.clone(), key(), TickFormat::Binary);
            store.store(tick(ts(2024, 5, 5)));
        }
        let path = layout.binary_path(&key(), ShardMonth::new(2024, 5).unwrap());
        assert_eq!(fs::metadata(path).unwrap().len(), BINARY_RECORD_SIZE as u64);
    }
}
