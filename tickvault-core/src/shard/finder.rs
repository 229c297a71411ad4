//! Single-record lookups: the first and the last stored tick of a market.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::codec::{decode_binary, decode_text, BINARY_RECORD_SIZE};
use super::layout::{ShardEncoding, ShardLayout};
use super::month::ShardMonth;
use crate::domain::{MarketKey, TickRecord};
use crate::error::ShardError;

/// The last-record search never steps back past this year.
pub const EARLIEST_YEAR: i32 = 2000;

const TAIL_WINDOW: u64 = 4096;

/// Finds the earliest stored tick of a market.
#[derive(Debug, Clone)]
pub struct FirstRecordFinder {
    layout: ShardLayout,
    key: MarketKey,
    prefer_binary: bool,
}

impl FirstRecordFinder {
    pub fn new(layout: ShardLayout, key: MarketKey, prefer_binary: bool) -> Self {
        Self {
            layout,
            key,
            prefer_binary,
        }
    }

    /// Scan forward from the earliest month with a shard and return the first
    /// decodable record. `Ok(None)` when the market has no data.
    pub fn find(&self) -> Result<Option<TickRecord>, ShardError> {
        for month in self.layout.list_months(&self.key)? {
            let Some((encoding, path)) =
                self.layout.readable_shard(&self.key, month, self.prefer_binary)
            else {
                continue;
            };
            let found = match encoding {
                ShardEncoding::Binary => first_binary(&path)?,
                ShardEncoding::Text => first_text(&path)?,
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }
}

/// Finds the most recent stored tick of a market.
#[derive(Debug, Clone)]
pub struct LastRecordFinder {
    layout: ShardLayout,
    key: MarketKey,
    prefer_binary: bool,
    earliest_year: i32,
}

impl LastRecordFinder {
    pub fn new(layout: ShardLayout, key: MarketKey, prefer_binary: bool) -> Self {
        Self {
            layout,
            key,
            prefer_binary,
            earliest_year: EARLIEST_YEAR,
        }
    }

    pub fn with_earliest_year(mut self, year: i32) -> Self {
        self.earliest_year = year;
        self
    }

    /// Start at the month of `now` and step back one month at a time until a
    /// shard with at least one record is found.
    pub fn find(&self, now: DateTime<Utc>) -> Result<Option<TickRecord>, ShardError> {
        let mut month = ShardMonth::from_datetime(now);
        while month.year() >= self.earliest_year {
            if let Some((encoding, path)) =
                self.layout.readable_shard(&self.key, month, self.prefer_binary)
            {
                let found = match encoding {
                    ShardEncoding::Binary => last_binary(&path)?,
                    ShardEncoding::Text => last_text(&path)?,
                };
                if found.is_some() {
                    return Ok(found);
                }
            }
            month = month.prev();
        }
        Ok(None)
    }
}

fn binary_len(file: &File, path: &Path) -> Result<u64, ShardError> {
    let len = file.metadata().map_err(|e| ShardError::io(path, e))?.len();
    if len % BINARY_RECORD_SIZE as u64 != 0 {
        return Err(ShardError::corrupt(
            path,
            format!("size {len} is not a multiple of {BINARY_RECORD_SIZE}-byte records"),
        ));
    }
    Ok(len)
}

fn read_binary_at(file: &mut File, path: &Path, offset: u64) -> Result<TickRecord, ShardError> {
    let mut raw = [0u8; BINARY_RECORD_SIZE];
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(&mut raw))
        .map_err(|e| ShardError::io(path, e))?;
    decode_binary(&raw).map_err(|reason| ShardError::corrupt(path, reason))
}

fn first_binary(path: &Path) -> Result<Option<TickRecord>, ShardError> {
    let mut file = File::open(path).map_err(|e| ShardError::io(path, e))?;
    if binary_len(&file, path)? == 0 {
        return Ok(None);
    }
    read_binary_at(&mut file, path, 0).map(Some)
}

fn last_binary(path: &Path) -> Result<Option<TickRecord>, ShardError> {
    let mut file = File::open(path).map_err(|e| ShardError::io(path, e))?;
    let len = binary_len(&file, path)?;
    if len == 0 {
        return Ok(None);
    }
    read_binary_at(&mut file, path, len - BINARY_RECORD_SIZE as u64).map(Some)
}

fn first_text(path: &Path) -> Result<Option<TickRecord>, ShardError> {
    let file = File::open(path).map_err(|e| ShardError::io(path, e))?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ShardError::io(path, e))?;
        if let Ok(tick) = decode_text(&line) {
            return Ok(Some(tick));
        }
    }
    Ok(None)
}

/// Read a growing window from the end of the file until it holds a decodable line.
fn last_text(path: &Path) -> Result<Option<TickRecord>, ShardError> {
    let mut file = File::open(path).map_err(|e| ShardError::io(path, e))?;
    let len = file.metadata().map_err(|e| ShardError::io(path, e))?.len();
    let mut window = TAIL_WINDOW.min(len);

    while window > 0 {
        let start = len - window;
        let mut tail = Vec::with_capacity(window as usize);
        file.seek(SeekFrom::Start(start))
            .and_then(|_| (&mut file).take(window).read_to_end(&mut tail))
            .map_err(|e| ShardError::io(path, e))?;
        let text = String::from_utf8_lossy(&tail);

        let mut lines: Vec<&str> = text.lines().collect();
        // The first line of a partial window may be cut mid-record.
        if start > 0 && !lines.is_empty() {
            lines.remove(0);
        }
        if let Some(tick) = lines.iter().rev().find_map(|l| decode_text(l).ok()) {
            return Ok(Some(tick));
        }
        if window == len {
            break;
        }
        window = (window * 2).min(len);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use crate::shard::layout::TickFormat;
    use crate::shard::store::TickShardStore;
    use chrono::TimeZone;

    fn key() -> MarketKey {
        MarketKey::new("kraken.com", "ETHEUR")
    }

    fn ts(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 8, 30, 0).unwrap().timestamp_millis()
    }

    fn populate(layout: &ShardLayout, format: TickFormat, days: &[(i32, u32, u32)]) {
        let store = TickShardStore::new(layout.clone(), key(), format);
        for (i, &(y, m, d)) in days.iter().enumerate() {
            store.store(TickRecord::new(ts(y, m, d), i as f64, i as f64 + 1.0, i as f64, 1.0, Direction::Long));
        }
        store.flush(true).unwrap();
    }

    #[test]
    fn first_and_last_across_months() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        populate(&layout, TickFormat::Both, &[(2023, 11, 3), (2023, 11, 4), (2024, 1, 9), (2024, 2, 1)]);

        for prefer_binary in [true, false] {
            let first = FirstRecordFinder::new(layout.clone(), key(), prefer_binary)
                .find()
                .unwrap()
                .unwrap();
            assert_eq!(first.timestamp_ms, ts(2023, 11, 3));

            let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
            let last = LastRecordFinder::new(layout.clone(), key(), prefer_binary)
                .find(now)
                .unwrap()
                .unwrap();
            assert_eq!(last.timestamp_ms, ts(2024, 2, 1));
            assert_eq!(last.bid, 3.0);
        }
    }

    #[test]
    fn last_search_stops_at_earliest_year() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        populate(&layout, TickFormat::Binary, &[(2010, 5, 5)]);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let finder = LastRecordFinder::new(layout.clone(), key(), true);
        assert!(finder.find(now).unwrap().is_some());
        let bounded = finder.with_earliest_year(2015);
        assert!(bounded.find(now).unwrap().is_none());
    }

    #[test]
    fn empty_market_has_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        assert!(FirstRecordFinder::new(layout.clone(), key(), true).find().unwrap().is_none());
        let now = Utc.with_ymd_and_hms(2001, 3, 1, 0, 0, 0).unwrap();
        assert!(LastRecordFinder::new(layout, key(), true).find(now).unwrap().is_none());
    }

    #[test]
    fn last_text_handles_long_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path());
        let store = TickShardStore::new(layout.clone(), key(), TickFormat::Text);
        let base = ts(2024, 3, 1);
        for i in 0..2000 {
            store.store(TickRecord::new(base + i, 1.0, 1.0, 1.0, 1.0, Direction::Neutral));
        }
        store.flush(true).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let last = LastRecordFinder::new(layout, key(), false).find(now).unwrap().unwrap();
        assert_eq!(last.timestamp_ms, base + 1999);
    }
}
