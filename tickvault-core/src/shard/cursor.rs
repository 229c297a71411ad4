//! Forward-only, memory-bounded replay of a market's tick history.
//!
//! The cursor walks month shards from the month of `from_ms` to the month of
//! `to_ms`. On a binary shard it binary-searches the first record at or after
//! `from_ms` over the implicit fixed-size record array, then reads in chunks of
//! `buffer_size` records. Text shards are scanned sequentially.
//!
//! Reading a shard that a live writer in the same process is appending to is
//! unsupported: no file lock is taken.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::codec::{decode_binary, decode_binary_timestamp, decode_text, BINARY_RECORD_SIZE};
use super::layout::{ShardEncoding, ShardLayout};
use super::month::ShardMonth;
use crate::domain::{MarketKey, TickRecord};
use crate::error::ShardError;

/// Default number of records read per chunk.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

const RECORD: u64 = BINARY_RECORD_SIZE as u64;

/// Replays ticks in `[from_ms, to_ms]`.
pub struct TickStreamCursor {
    layout: ShardLayout,
    key: MarketKey,
    from_ms: i64,
    to_ms: i64,
    buffer_size: usize,
    prefer_binary: bool,
    current_month: ShardMonth,
    last_month: ShardMonth,
    months: Vec<ShardMonth>,
    month_opened: bool,
    source: Option<ShardSource>,
    buffer: VecDeque<TickRecord>,
    opened: bool,
    exhausted: bool,
}

enum ShardSource {
    Binary {
        path: PathBuf,
        reader: BufReader<File>,
        remaining: u64,
    },
    Text {
        path: PathBuf,
        reader: BufReader<File>,
        line: usize,
    },
}

impl TickStreamCursor {
    pub fn new(
        layout: ShardLayout,
        key: MarketKey,
        from_ms: i64,
        to_ms: i64,
        buffer_size: usize,
        prefer_binary: bool,
    ) -> Self {
        let current_month = ShardMonth::from_timestamp_ms(from_ms);
        Self {
            layout,
            key,
            from_ms,
            to_ms,
            buffer_size: buffer_size.max(1),
            prefer_binary,
            current_month,
            last_month: ShardMonth::from_timestamp_ms(to_ms),
            months: Vec::new(),
            month_opened: false,
            source: None,
            buffer: VecDeque::new(),
            opened: false,
            exhausted: from_ms > to_ms,
        }
    }

    pub fn key(&self) -> &MarketKey {
        &self.key
    }

    pub fn from_ms(&self) -> i64 {
        self.from_ms
    }

    pub fn to_ms(&self) -> i64 {
        self.to_ms
    }

    /// Month the cursor is currently reading (or about to read).
    pub fn current_month(&self) -> ShardMonth {
        self.current_month
    }

    /// Open the shard of the first month and seek to `from_ms`.
    ///
    /// A missing shard is not an error; the cursor moves on to later months
    /// when data is requested. Called implicitly by [`next`](Self::next).
    pub fn open(&mut self) -> Result<(), ShardError> {
        self.opened = true;
        if self.exhausted || self.month_opened {
            return Ok(());
        }
        // Only months with a shard on disk are visited.
        self.months = match self.layout.list_months(&self.key) {
            Ok(months) => months,
            Err(e) => return Err(self.fail(e)),
        };
        match self.months.last() {
            Some(latest) if *latest < self.last_month => self.last_month = *latest,
            Some(_) => {}
            None => {
                self.exhausted = true;
                return Ok(());
            }
        }
        self.month_opened = true;
        match self.open_month(self.current_month) {
            Ok(source) => {
                self.source = source;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// True once every month up to `to_ms` has been consumed and nothing is buffered.
    pub fn finished(&self) -> bool {
        self.buffer.is_empty() && (self.exhausted || self.current_month > self.last_month)
    }

    /// Return every tick with `timestamp <= upper_bound_ms` (and within the
    /// cursor range), in stored order. Stops at the first later tick, which
    /// stays buffered for the next call.
    pub fn next(&mut self, upper_bound_ms: i64) -> Result<Vec<TickRecord>, ShardError> {
        if !self.opened {
            self.open()?;
        }
        let bound = upper_bound_ms.min(self.to_ms);
        let mut out = Vec::new();
        loop {
            while let Some(front) = self.buffer.front() {
                if front.timestamp_ms > bound {
                    return Ok(out);
                }
                out.extend(self.buffer.pop_front());
            }
            if self.bufferize()? == 0 {
                return Ok(out);
            }
        }
    }

    /// Everything remaining in range.
    pub fn read_all(&mut self) -> Result<Vec<TickRecord>, ShardError> {
        self.next(i64::MAX)
    }

    /// Timestamp of the next tick to be returned, reading ahead if needed.
    pub fn peek_timestamp(&mut self) -> Result<Option<i64>, ShardError> {
        if !self.opened {
            self.open()?;
        }
        if self.buffer.is_empty() {
            self.bufferize()?;
        }
        Ok(self.buffer.front().map(|t| t.timestamp_ms))
    }

    /// Refill the buffer with up to `buffer_size` records, rolling over months
    /// as shards run out. Returns the number of records added; zero means the
    /// range is exhausted.
    fn bufferize(&mut self) -> Result<usize, ShardError> {
        let mut added = 0;
        while self.buffer.len() < self.buffer_size {
            if !self.ensure_source()? {
                break;
            }
            let room = self.buffer_size - self.buffer.len();
            let chunk = match self.read_chunk(room) {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.fail(e)),
            };
            if chunk.is_empty() {
                // Shard exhausted: roll over to the next month.
                self.source = None;
                self.advance_month();
                continue;
            }
            for tick in chunk {
                if tick.timestamp_ms < self.from_ms {
                    continue;
                }
                if tick.timestamp_ms > self.to_ms {
                    self.exhausted = true;
                    self.source = None;
                    return Ok(added);
                }
                self.buffer.push_back(tick);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Make sure a shard is open, advancing over missing months.
    /// Returns false when no month is left in range.
    fn ensure_source(&mut self) -> Result<bool, ShardError> {
        loop {
            if self.source.is_some() {
                return Ok(true);
            }
            if self.exhausted || self.current_month > self.last_month {
                return Ok(false);
            }
            if !self.month_opened {
                self.month_opened = true;
                match self.open_month(self.current_month) {
                    Ok(Some(source)) => {
                        self.source = Some(source);
                        return Ok(true);
                    }
                    Ok(None) => {}
                    Err(e) => return Err(self.fail(e)),
                }
            }
            self.advance_month();
        }
    }

    /// Move to the next month that has a shard, or past the range if none is left.
    fn advance_month(&mut self) {
        let current = self.current_month;
        self.current_month = match self.months.iter().find(|m| **m > current) {
            Some(month) => *month,
            None => self.last_month.next().max(current.next()),
        };
        self.month_opened = false;
    }

    fn open_month(&self, month: ShardMonth) -> Result<Option<ShardSource>, ShardError> {
        let Some((encoding, path)) = self.layout.readable_shard(&self.key, month, self.prefer_binary)
        else {
            return Ok(None);
        };
        let file = File::open(&path).map_err(|e| ShardError::io(&path, e))?;
        match encoding {
            ShardEncoding::Binary => {
                let (reader, remaining) = seek_binary(file, &path, self.from_ms)?;
                Ok(Some(ShardSource::Binary {
                    path,
                    reader,
                    remaining,
                }))
            }
            ShardEncoding::Text => Ok(Some(ShardSource::Text {
                path,
                reader: BufReader::new(file),
                line: 0,
            })),
        }
    }

    fn read_chunk(&mut self, max_records: usize) -> Result<Vec<TickRecord>, ShardError> {
        match self.source.as_mut() {
            None => Ok(Vec::new()),
            Some(ShardSource::Binary {
                path,
                reader,
                remaining,
            }) => {
                let path = path.as_path();
                let count = (*remaining).min(max_records as u64) as usize;
                let mut bytes = vec![0u8; count * BINARY_RECORD_SIZE];
                reader
                    .read_exact(&mut bytes)
                    .map_err(|e| ShardError::io(path, e))?;
                *remaining -= count as u64;
                bytes
                    .chunks_exact(BINARY_RECORD_SIZE)
                    .map(|raw| decode_binary(raw).map_err(|reason| ShardError::corrupt(path, reason)))
                    .collect()
            }
            Some(ShardSource::Text { path, reader, line }) => {
                let path = path.as_path();
                let mut out = Vec::with_capacity(max_records);
                let mut raw = String::new();
                while out.len() < max_records {
                    raw.clear();
                    let read = reader
                        .read_line(&mut raw)
                        .map_err(|e| ShardError::io(path, e))?;
                    if read == 0 {
                        break;
                    }
                    *line += 1;
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let tick = decode_text(&raw).map_err(|reason| ShardError::Decode {
                        path: path.to_path_buf(),
                        line: *line,
                        reason,
                    })?;
                    out.push(tick);
                }
                Ok(out)
            }
        }
    }

    /// Errors are terminal: drop the shard and stop reading.
    fn fail(&mut self, err: ShardError) -> ShardError {
        self.source = None;
        self.exhausted = true;
        self.buffer.clear();
        err
    }
}

/// Position a binary shard on the first record with `timestamp >= from_ms`.
///
/// Treats the file as an array of fixed-size slots and narrows a `[left, right)`
/// byte window by probing the record at its midpoint, so a seek costs
/// O(log(records)) reads. Returns the reader and the number of records left.
fn seek_binary(
    mut file: File,
    path: &Path,
    from_ms: i64,
) -> Result<(BufReader<File>, u64), ShardError> {
    let len = file
        .metadata()
        .map_err(|e| ShardError::io(path, e))?
        .len();
    if len % RECORD != 0 {
        return Err(ShardError::corrupt(
            path,
            format!("size {len} is not a multiple of {RECORD}-byte records"),
        ));
    }

    let mut left = 0u64;
    let mut right = len;
    let mut probe = [0u8; 8];
    while right > left {
        let mid = left + ((right - left) / RECORD / 2) * RECORD;
        file.seek(SeekFrom::Start(mid))
            .and_then(|_| file.read_exact(&mut probe))
            .map_err(|e| ShardError::io(path, e))?;
        let ts = decode_binary_timestamp(&probe).map_err(|reason| ShardError::corrupt(path, reason))?;
        if ts < from_ms {
            left = mid + RECORD;
        } else {
            right = mid;
        }
    }

    file.seek(SeekFrom::Start(left))
        .map_err(|e| ShardError::io(path, e))?;
    Ok((BufReader::new(file), (len - left) / RECORD))
}
