//! Integration tests for the tick shard store, cursor and finders working together.

use chrono::{TimeZone, Utc};
use std::fs;
use tempfile::tempdir;
use tickvault_core::domain::{Direction, MarketKey, TickRecord};
use tickvault_core::shard::{
    FirstRecordFinder, LastRecordFinder, ShardLayout, ShardMonth, TickFormat, TickShardStore,
    TickStreamCursor, BINARY_RECORD_SIZE,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn ms(y: i32, m: u32, d: u32, h: u32) -> i64 {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().timestamp_millis()
}

fn tick(ts: i64, px: f64) -> TickRecord {
    TickRecord::new(ts, px - 0.5, px + 0.5, px, 1.0, Direction::Long)
}

fn key() -> MarketKey {
    MarketKey::new("binance", "BTCUSDT")
}

/// One tick per hour from Jan 28 00:00 to Feb 3 23:00, 2024.
fn hourly_ticks() -> Vec<TickRecord> {
    let start = ms(2024, 1, 28, 0);
    let end = ms(2024, 2, 4, 0);
    (0..)
        .map(|i| start + i * 3_600_000)
        .take_while(|ts| *ts < end)
        .enumerate()
        .map(|(i, ts)| tick(ts, 100.0 + i as f64))
        .collect()
}

fn write_all(layout: &ShardLayout, format: TickFormat, ticks: &[TickRecord]) {
    let store = TickShardStore::new(layout.clone(), key(), format);
    store.store_batch(ticks.iter().copied());
    let report = store.flush(true).unwrap();
    assert_eq!(report.written, ticks.len());
}

// ── Layout on disk ───────────────────────────────────────────────────

#[test]
fn month_shards_land_at_documented_paths() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    write_all(&layout, TickFormat::Both, &hourly_ticks());

    let t_dir = dir.path().join("binance").join("BTCUSDT").join("T");
    let jan_text = t_dir.join("202401BTCUSDT");
    let feb_bin = t_dir.join("202402BTCUSDT.dat");
    assert!(jan_text.is_file());
    assert!(t_dir.join("202401BTCUSDT.dat").is_file());
    assert!(t_dir.join("202402BTCUSDT").is_file());
    assert!(feb_bin.is_file());

    // Jan 28..31 = 4 days, Feb 1..3 = 3 days, 24 ticks each.
    let feb_len = fs::metadata(&feb_bin).unwrap().len() as usize;
    assert_eq!(feb_len, 3 * 24 * BINARY_RECORD_SIZE);
    let jan_lines = fs::read_to_string(&jan_text).unwrap().lines().count();
    assert_eq!(jan_lines, 4 * 24);

    assert_eq!(
        layout.list_months(&key()).unwrap(),
        vec![
            ShardMonth::new(2024, 1).unwrap(),
            ShardMonth::new(2024, 2).unwrap()
        ]
    );
}

// ── Cursor across a month boundary ───────────────────────────────────

#[test]
fn cursor_rolls_over_month_boundary_binary_and_text() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let ticks = hourly_ticks();
    write_all(&layout, TickFormat::Both, &ticks);

    let from = ms(2024, 1, 30, 0);
    let to = ms(2024, 2, 2, 0);
    let expected: Vec<_> = ticks
        .iter()
        .copied()
        .filter(|t| t.timestamp_ms >= from && t.timestamp_ms <= to)
        .collect();

    for prefer_binary in [true, false] {
        let mut cursor = TickStreamCursor::new(layout.clone(), key(), from, to, 7, prefer_binary);
        let got = cursor.read_all().unwrap();
        assert_eq!(got, expected, "prefer_binary={prefer_binary}");
        assert!(cursor.finished());
    }
}

#[test]
fn cursor_paces_replay_by_upper_bound() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let ticks = hourly_ticks();
    write_all(&layout, TickFormat::Binary, &ticks);

    let from = ticks[0].timestamp_ms;
    let to = ticks[ticks.len() - 1].timestamp_ms;
    let mut cursor = TickStreamCursor::new(layout, key(), from, to, 10, true);

    let mut replayed = Vec::new();
    let mut clock = from;
    while !cursor.finished() {
        let batch = cursor.next(clock).unwrap();
        assert!(batch.iter().all(|t| t.timestamp_ms <= clock));
        replayed.extend(batch);
        clock += 6 * 3_600_000;
    }
    assert_eq!(replayed, ticks);
}

#[test]
fn cursor_seeks_inside_binary_shard() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    // Same-month ticks, timestamps 10, 20, ..., 1000 minutes after Jan 1.
    let base = ms(2024, 1, 1, 0);
    let ticks: Vec<_> = (1..=100)
        .map(|i| tick(base + i * 600_000, i as f64))
        .collect();
    write_all(&layout, TickFormat::Binary, &ticks);

    // Between two records: starts at the next one.
    let from = base + 255 * 60_000;
    let mut cursor = TickStreamCursor::new(layout.clone(), key(), from, i64::MAX / 4, 16, true);
    assert_eq!(cursor.peek_timestamp().unwrap(), Some(base + 26 * 600_000));

    // Beyond the last record: nothing to read.
    let mut cursor = TickStreamCursor::new(layout, key(), base + 2_000 * 60_000, base + 3_000 * 60_000, 16, true);
    assert!(cursor.read_all().unwrap().is_empty());
}

#[test]
fn cursor_skips_missing_months() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let ticks = vec![tick(ms(2023, 11, 5, 0), 1.0), tick(ms(2024, 3, 5, 0), 2.0)];
    write_all(&layout, TickFormat::Both, &ticks);

    let mut cursor = TickStreamCursor::new(
        layout,
        key(),
        ms(2023, 11, 1, 0),
        ms(2024, 3, 31, 0),
        100,
        true,
    );
    assert_eq!(cursor.read_all().unwrap(), ticks);
}

// ── Finders ──────────────────────────────────────────────────────────

#[test]
fn finders_agree_with_written_extremes() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let ticks = hourly_ticks();
    write_all(&layout, TickFormat::Both, &ticks);

    for prefer_binary in [true, false] {
        let first = FirstRecordFinder::new(layout.clone(), key(), prefer_binary)
            .find()
            .unwrap();
        assert_eq!(first, Some(ticks[0]));

        let last = LastRecordFinder::new(layout.clone(), key(), prefer_binary)
            .find(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(last, ticks.last().copied());
    }
}

#[test]
fn appends_across_flushes_preserve_order() {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let ticks = hourly_ticks();
    let (head, tail) = ticks.split_at(50);

    let store = TickShardStore::new(layout.clone(), key(), TickFormat::Both);
    store.store_batch(head.iter().copied());
    store.flush(false).unwrap();
    store.store_batch(tail.iter().copied());
    store.flush(true).unwrap();

    let mut cursor = TickStreamCursor::new(
        layout,
        key(),
        ticks[0].timestamp_ms,
        ticks[ticks.len() - 1].timestamp_ms,
        32,
        false,
    );
    assert_eq!(cursor.read_all().unwrap(), ticks);
}
