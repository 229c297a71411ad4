//! Tick record encodings.
//!
//! Binary: fixed 41-byte little-endian record, no header, no padding:
//! `f64 timestamp_seconds | f64 bid | f64 ask | f64 last | f64 volume | i8 direction`.
//!
//! Text: one tab-separated line per record:
//! `timestamp_ms\tbid\task\tlast\tvolume\tdirection\n`.
//!
//! Both decode into the same millisecond `TickRecord`; the binary timestamp is
//! converted at the boundary and rounded back to the nearest millisecond.

use crate::domain::{Direction, TickRecord};

/// Size of one binary tick record in bytes.
pub const BINARY_RECORD_SIZE: usize = 41;

const F64_SIZE: usize = 8;

pub fn ms_to_seconds(timestamp_ms: i64) -> f64 {
    timestamp_ms as f64 / 1000.0
}

pub fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// Encode one record into its 41-byte binary form.
pub fn encode_binary(tick: &TickRecord) -> [u8; BINARY_RECORD_SIZE] {
    let mut out = [0u8; BINARY_RECORD_SIZE];
    let fields = [
        ms_to_seconds(tick.timestamp_ms),
        tick.bid,
        tick.ask,
        tick.last,
        tick.volume,
    ];
    for (i, value) in fields.iter().enumerate() {
        out[i * F64_SIZE..(i + 1) * F64_SIZE].copy_from_slice(&value.to_le_bytes());
    }
    out[BINARY_RECORD_SIZE - 1] = tick.direction.as_i8() as u8;
    out
}

/// Append the binary encoding of `ticks` to `buf`.
pub fn encode_binary_into(ticks: &[TickRecord], buf: &mut Vec<u8>) {
    buf.reserve(ticks.len() * BINARY_RECORD_SIZE);
    for tick in ticks {
        buf.extend_from_slice(&encode_binary(tick));
    }
}

fn read_f64(bytes: &[u8], index: usize) -> f64 {
    let mut raw = [0u8; F64_SIZE];
    raw.copy_from_slice(&bytes[index * F64_SIZE..(index + 1) * F64_SIZE]);
    f64::from_le_bytes(raw)
}

/// Decode only the timestamp of a binary record (needs the first 8 bytes).
pub fn decode_binary_timestamp(bytes: &[u8]) -> Result<i64, String> {
    if bytes.len() < F64_SIZE {
        return Err(format!("need {F64_SIZE} bytes, got {}", bytes.len()));
    }
    let seconds = read_f64(bytes, 0);
    if !seconds.is_finite() {
        return Err(format!("non-finite timestamp {seconds}"));
    }
    Ok(seconds_to_ms(seconds))
}

/// Decode one 41-byte binary record.
pub fn decode_binary(bytes: &[u8]) -> Result<TickRecord, String> {
    if bytes.len() != BINARY_RECORD_SIZE {
        return Err(format!(
            "binary record must be {BINARY_RECORD_SIZE} bytes, got {}",
            bytes.len()
        ));
    }
    let timestamp_ms = decode_binary_timestamp(bytes)?;
    let raw_direction = bytes[BINARY_RECORD_SIZE - 1] as i8;
    let direction = Direction::from_i8(raw_direction)
        .ok_or_else(|| format!("invalid direction byte {raw_direction}"))?;
    Ok(TickRecord {
        timestamp_ms,
        bid: read_f64(bytes, 1),
        ask: read_f64(bytes, 2),
        last: read_f64(bytes, 3),
        volume: read_f64(bytes, 4),
        direction,
    })
}

/// Encode one record as a text line, newline included.
pub fn encode_text(tick: &TickRecord) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\n",
        tick.timestamp_ms,
        tick.bid,
        tick.ask,
        tick.last,
        tick.volume,
        tick.direction.as_i8()
    )
}

pub fn encode_text_into(ticks: &[TickRecord], buf: &mut Vec<u8>) {
    for tick in ticks {
        buf.extend_from_slice(encode_text(tick).as_bytes());
    }
}

/// Decode one text line. Trailing `\n` / `\r\n` is tolerated.
pub fn decode_text(line: &str) -> Result<TickRecord, String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut parts = line.split('\t');
    let mut field = |name: &str| {
        parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing field '{name}'"))
    };

    let timestamp_ms = field("timestamp")?
        .parse::<i64>()
        .map_err(|e| format!("timestamp: {e}"))?;
    let bid = parse_f64(field("bid")?, "bid")?;
    let ask = parse_f64(field("ask")?, "ask")?;
    let last = parse_f64(field("last")?, "last")?;
    let volume = parse_f64(field("volume")?, "volume")?;
    let raw_direction = field("direction")?
        .parse::<i8>()
        .map_err(|e| format!("direction: {e}"))?;
    let direction = Direction::from_i8(raw_direction)
        .ok_or_else(|| format!("invalid direction {raw_direction}"))?;

    if parts.next().is_some() {
        return Err("too many fields".into());
    }

    Ok(TickRecord {
        timestamp_ms,
        bid,
        ask,
        last,
        volume,
        direction,
    })
}

fn parse_f64(raw: &str, name: &str) -> Result<f64, String> {
    raw.parse::<f64>().map_err(|e| format!("{name}: {e}"))
}
