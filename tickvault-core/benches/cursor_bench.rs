//! Criterion benchmarks for the tick read path.
//!
//! Benchmarks:
//! 1. Cursor open on a binary shard (binary-search seek)
//! 2. Cursor open on a text shard (linear scan)
//! 3. Full-month read with different buffer sizes
//! 4. Store flush of a batch into both encodings

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

use tickvault_core::domain::{Direction, MarketKey, TickRecord};
use tickvault_core::shard::{ShardLayout, TickFormat, TickShardStore, TickStreamCursor};

// 2024-03-01T00:00:00Z
const BASE_MS: i64 = 1_709_251_200_000;
const TICKS: i64 = 200_000;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_ticks(n: i64) -> Vec<TickRecord> {
    (0..n)
        .map(|i| {
            let px = 100.0 + (i as f64 * 0.01).sin();
            TickRecord::new(BASE_MS + i * 250, px - 0.01, px + 0.01, px, 1.0, Direction::Neutral)
        })
        .collect()
}

fn key() -> MarketKey {
    MarketKey::new("bench", "EURUSD")
}

fn populated_layout() -> (TempDir, ShardLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let store = TickShardStore::new(layout.clone(), key(), TickFormat::Both);
    store.store_batch(make_ticks(TICKS));
    store.flush(true).unwrap();
    (dir, layout)
}

// ── 1 + 2. Seek vs scan ──────────────────────────────────────────────

fn bench_open(c: &mut Criterion) {
    let (_dir, layout) = populated_layout();
    let from = BASE_MS + (TICKS * 3 / 4) * 250;
    let mut group = c.benchmark_group("cursor_open");

    for (name, prefer_binary) in [("binary_seek", true), ("text_scan", false)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut cursor =
                    TickStreamCursor::new(layout.clone(), key(), from, i64::MAX / 4, 100, prefer_binary);
                black_box(cursor.peek_timestamp().unwrap())
            })
        });
    }
    group.finish();
}

// ── 3. Full read by buffer size ──────────────────────────────────────

fn bench_read_all(c: &mut Criterion) {
    let (_dir, layout) = populated_layout();
    let mut group = c.benchmark_group("cursor_read_all");
    group.sample_size(10);

    for buffer in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(buffer), &buffer, |b, &buffer| {
            b.iter(|| {
                let mut cursor =
                    TickStreamCursor::new(layout.clone(), key(), BASE_MS, i64::MAX / 4, buffer, true);
                black_box(cursor.read_all().unwrap().len())
            })
        });
    }
    group.finish();
}

// ── 4. Flush ─────────────────────────────────────────────────────────

fn bench_flush(c: &mut Criterion) {
    let ticks = make_ticks(10_000);
    let mut group = c.benchmark_group("store_flush");
    group.sample_size(20);

    group.bench_function("both_encodings_10k", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let store = TickShardStore::new(ShardLayout::new(dir.path()), key(), TickFormat::Both);
                store.store_batch(ticks.iter().copied());
                (dir, store)
            },
            |(dir, store)| {
                black_box(store.flush(true).unwrap());
                drop(store);
                drop(dir);
            },
        )
    });
    group.finish();
}

criterion_group!(benches, bench_open, bench_read_all, bench_flush);
criterion_main!(benches);
