//! Property tests for storage invariants.
//!
//! Uses proptest to verify:
//! 1. Round trip: what the store writes, the cursor reads back (both encodings)
//! 2. Range filtering: the cursor returns exactly the ticks inside `[from, to]`
//! 3. Retention: eligibility is monotonic in bar age

use proptest::prelude::*;
use tempfile::tempdir;
use tickvault_core::domain::{Direction, MarketKey, TickRecord};
use tickvault_core::retention::{RetentionPolicy, RetentionTier};
use tickvault_core::shard::{ShardLayout, TickFormat, TickShardStore, TickStreamCursor};

// 2024-01-01T00:00:00Z
const BASE_MS: i64 = 1_704_067_200_000;
// Roughly 100 days, so runs span several month shards.
const SPAN_MS: i64 = 100 * 86_400_000;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..100_000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Short),
        Just(Direction::Neutral),
        Just(Direction::Long)
    ]
}

fn arb_tick() -> impl Strategy<Value = TickRecord> {
    (
        0..SPAN_MS,
        arb_price(),
        0.0..5.0_f64,
        0.0..1_000.0_f64,
        arb_direction(),
    )
        .prop_map(|(offset, px, half_spread, volume, direction)| {
            TickRecord::new(
                BASE_MS + offset,
                px - half_spread,
                px + half_spread,
                px,
                volume,
                direction,
            )
        })
}

/// Ticks sorted by timestamp, as a feed would deliver them.
fn arb_ticks() -> impl Strategy<Value = Vec<TickRecord>> {
    prop::collection::vec(arb_tick(), 1..200).prop_map(|mut ticks| {
        ticks.sort_by_key(|t| t.timestamp_ms);
        ticks
    })
}

fn write(ticks: &[TickRecord]) -> (tempfile::TempDir, ShardLayout) {
    let dir = tempdir().unwrap();
    let layout = ShardLayout::new(dir.path());
    let store = TickShardStore::new(layout.clone(), MarketKey::new("b", "m"), TickFormat::Both);
    store.store_batch(ticks.iter().copied());
    store.flush(true).unwrap();
    (dir, layout)
}

// ── 1. Round trip ────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every stored tick is read back unchanged, in order, from either encoding.
    #[test]
    fn store_then_read_round_trips(ticks in arb_ticks(), buffer in 1usize..64) {
        let (_dir, layout) = write(&ticks);
        for prefer_binary in [true, false] {
            let mut cursor = TickStreamCursor::new(
                layout.clone(),
                MarketKey::new("b", "m"),
                BASE_MS,
                BASE_MS + SPAN_MS,
                buffer,
                prefer_binary,
            );
            let got = cursor.read_all().unwrap();
            prop_assert_eq!(&got, &ticks);
        }
    }

    // ── 2. Range filtering ───────────────────────────────────────────

    /// The cursor returns exactly the ticks with `from <= ts <= to`.
    #[test]
    fn cursor_respects_range(
        ticks in arb_ticks(),
        a in 0..SPAN_MS,
        b in 0..SPAN_MS,
    ) {
        let (from, to) = (BASE_MS + a.min(b), BASE_MS + a.max(b));
        let (_dir, layout) = write(&ticks);
        let expected: Vec<_> = ticks
            .iter()
            .copied()
            .filter(|t| t.timestamp_ms >= from && t.timestamp_ms <= to)
            .collect();

        let mut cursor = TickStreamCursor::new(layout, MarketKey::new("b", "m"), from, to, 16, true);
        prop_assert_eq!(cursor.read_all().unwrap(), expected);
    }
}

// ── 3. Retention monotonicity ────────────────────────────────────────

proptest! {
    /// Once a bar is eligible for deletion, any older bar of the same timeframe is too.
    #[test]
    fn eligibility_is_monotonic_in_age(
        tf in 60u32..100_000,
        age in 0u64..10_000_000,
        extra in 0u64..10_000_000,
    ) {
        let policy = RetentionPolicy::default();
        if policy.is_eligible(tf, age) {
            prop_assert!(policy.is_eligible(tf, age + extra));
        }
    }

    /// Timeframes above the highest ceiling are never deleted.
    #[test]
    fn uncovered_timeframes_are_kept(ceiling in 60u32..10_000, age in any::<u64>()) {
        let policy = RetentionPolicy::new(vec![RetentionTier::new(ceiling, 0)]).unwrap();
        prop_assert!(!policy.is_eligible(ceiling + 1, age));
        prop_assert!(policy.is_eligible(ceiling, age));
    }
}
