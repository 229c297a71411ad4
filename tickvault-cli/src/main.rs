//! TickVault CLI: inspection and bulk tooling over the tick shard store.
//!
//! Commands:
//! - `first` / `last`: print the first or last stored tick of a market
//! - `replay`: stream a time range to stdout
//! - `export`: write a time range to CSV
//! - `import`: bulk-load ticks from CSV (continuous flush mode)
//! - `months`: list shard months on disk with record counts
//! - `retention`: preview the OHLC cleanup targets of the configured policy

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tickvault_core::domain::{Direction, MarketKey, TickRecord};
use tickvault_core::shard::codec::encode_text;
use tickvault_core::shard::{
    FirstRecordFinder, LastRecordFinder, ShardEncoding, ShardLayout, TickFormat, TickShardStore,
    TickStreamCursor, BINARY_RECORD_SIZE,
};
use tickvault_service::StoreConfig;

/// Ticks handed to the store per flush during import.
const IMPORT_CHUNK: usize = 10_000;

#[derive(Parser)]
#[command(name = "tickvault", about = "TickVault CLI: month-sharded tick store tooling")]
struct Cli {
    /// Store config (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tick store root; overrides `tick_root` from the config.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the first stored tick of a market.
    First {
        broker: String,
        market: String,

        /// Read the text shards instead of the binary ones.
        #[arg(long, default_value_t = false)]
        text: bool,
    },
    /// Print the last stored tick of a market.
    Last {
        broker: String,
        market: String,

        #[arg(long, default_value_t = false)]
        text: bool,
    },
    /// Stream ticks in a time range to stdout, one tab-separated line per tick.
    Replay {
        broker: String,
        market: String,

        /// Start (inclusive): RFC 3339, YYYY-MM-DD or epoch milliseconds.
        #[arg(long)]
        from: String,

        /// End (inclusive). Defaults to now.
        #[arg(long)]
        to: Option<String>,

        #[arg(long, default_value_t = false)]
        text: bool,

        /// Emit JSON lines instead of tab-separated text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Export ticks in a time range to CSV.
    Export {
        broker: String,
        market: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: Option<String>,

        /// Output CSV file.
        #[arg(long)]
        out: PathBuf,
    },
    /// Bulk-import ticks from CSV (columns: timestamp_ms,bid,ask,last,volume,direction).
    Import {
        broker: String,
        market: String,

        #[arg(long)]
        input: PathBuf,

        /// Encodings to write. Defaults to `tick_format` from the config.
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// List shard months present on disk with record counts.
    Months { broker: String, market: String },
    /// Print the OHLC cleanup targets of the configured retention policy.
    Retention {
        /// Reference time. Defaults to now.
        #[arg(long)]
        now: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Binary,
    Text,
    Both,
}

impl From<FormatArg> for TickFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Binary => TickFormat::Binary,
            FormatArg::Text => TickFormat::Text,
            FormatArg::Both => TickFormat::Both,
        }
    }
}

/// CSV row: direction as a signed integer rather than an enum name.
#[derive(Debug, Serialize, Deserialize)]
struct CsvTick {
    timestamp_ms: i64,
    bid: f64,
    ask: f64,
    last: f64,
    volume: f64,
    direction: i8,
}

impl From<&TickRecord> for CsvTick {
    fn from(t: &TickRecord) -> Self {
        Self {
            timestamp_ms: t.timestamp_ms,
            bid: t.bid,
            ask: t.ask,
            last: t.last,
            volume: t.volume,
            direction: t.direction.as_i8(),
        }
    }
}

impl TryFrom<CsvTick> for TickRecord {
    type Error = anyhow::Error;

    fn try_from(row: CsvTick) -> Result<Self> {
        let Some(direction) = Direction::from_i8(row.direction) else {
            bail!("direction must be -1, 0 or 1, got {}", row.direction);
        };
        Ok(TickRecord::new(
            row.timestamp_ms,
            row.bid,
            row.ask,
            row.last,
            row.volume,
            direction,
        ))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(root) = cli.root {
        config.tick_root = root;
    }
    let layout = config.layout();

    match cli.command {
        Commands::First {
            broker,
            market,
            text,
        } => {
            let tick = FirstRecordFinder::new(layout, MarketKey::new(broker, market), !text).find()?;
            print_tick(tick)
        }
        Commands::Last {
            broker,
            market,
            text,
        } => {
            let tick = LastRecordFinder::new(layout, MarketKey::new(broker, market), !text)
                .find(Utc::now())?;
            print_tick(tick)
        }
        Commands::Replay {
            broker,
            market,
            from,
            to,
            text,
            json,
        } => {
            let cursor = open_cursor(&config, layout, broker, market, &from, to.as_deref(), text)?;
            run_replay(cursor, json)
        }
        Commands::Export {
            broker,
            market,
            from,
            to,
            out,
        } => {
            let cursor = open_cursor(&config, layout, broker, market, &from, to.as_deref(), false)?;
            let count = export_csv(cursor, &out)?;
            println!("Exported {count} ticks to {}", out.display());
            Ok(())
        }
        Commands::Import {
            broker,
            market,
            input,
            format,
        } => {
            let format = format.map(TickFormat::from).unwrap_or(config.tick_format);
            let count = import_csv(&layout, MarketKey::new(broker, market), format, &input)?;
            println!("Imported {count} ticks from {}", input.display());
            Ok(())
        }
        Commands::Months { broker, market } => {
            run_months(&layout, &MarketKey::new(broker, market))
        }
        Commands::Retention { now } => {
            let now_ms = match now {
                Some(s) => parse_time(&s)?,
                None => Utc::now().timestamp_millis(),
            };
            run_retention(&config, now_ms)
        }
    }
}

fn print_tick(tick: Option<TickRecord>) -> Result<()> {
    match tick {
        Some(t) => println!("{} {}", format_ms(t.timestamp_ms), encode_text(&t).trim_end()),
        None => println!("No ticks stored"),
    }
    Ok(())
}

fn open_cursor(
    config: &StoreConfig,
    layout: ShardLayout,
    broker: String,
    market: String,
    from: &str,
    to: Option<&str>,
    text: bool,
) -> Result<TickStreamCursor> {
    let from_ms = parse_time(from)?;
    let to_ms = match to {
        Some(s) => parse_time(s)?,
        None => Utc::now().timestamp_millis(),
    };
    if from_ms > to_ms {
        bail!("--from is after --to");
    }
    Ok(TickStreamCursor::new(
        layout,
        MarketKey::new(broker, market),
        from_ms,
        to_ms,
        config.cursor_buffer_size,
        !text,
    ))
}

fn run_replay(mut cursor: TickStreamCursor, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    while !cursor.finished() {
        let batch = cursor.next(i64::MAX)?;
        if batch.is_empty() {
            break;
        }
        for tick in &batch {
            if json {
                serde_json::to_writer(&mut out, tick)?;
                out.write_all(b"\n")?;
            } else {
                out.write_all(encode_text(tick).as_bytes())?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn export_csv(mut cursor: TickStreamCursor, out: &Path) -> Result<usize> {
    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("creating {}", out.display()))?;
    let mut count = 0;
    loop {
        let batch = cursor.next(i64::MAX)?;
        if batch.is_empty() {
            break;
        }
        for tick in &batch {
            writer.serialize(CsvTick::from(tick))?;
        }
        count += batch.len();
    }
    writer.flush()?;
    Ok(count)
}

fn import_csv(layout: &ShardLayout, key: MarketKey, format: TickFormat, input: &Path) -> Result<usize> {
    let mut reader =
        csv::Reader::from_path(input).with_context(|| format!("opening {}", input.display()))?;
    let store = TickShardStore::new(layout.clone(), key, format).with_continuous(true);

    let mut chunk = Vec::with_capacity(IMPORT_CHUNK);
    let mut count = 0;
    for (i, row) in reader.deserialize::<CsvTick>().enumerate() {
        let row = row.with_context(|| format!("reading row {}", i + 1))?;
        chunk.push(TickRecord::try_from(row).with_context(|| format!("row {}", i + 1))?);
        if chunk.len() == IMPORT_CHUNK {
            count += chunk.len();
            store.store_batch(chunk.drain(..));
            store.flush(false)?;
            info!("{}: imported {count} ticks", store.key());
        }
    }
    count += chunk.len();
    store.store_batch(chunk);
    store.flush(true)?;
    Ok(count)
}

fn run_months(layout: &ShardLayout, key: &MarketKey) -> Result<()> {
    let months = layout.list_months(key)?;
    if months.is_empty() {
        println!("No shards for {key} under {}", layout.root().display());
        return Ok(());
    }
    println!("{:<8} {:>12}  {}", "MONTH", "RECORDS", "SOURCE");
    for month in months {
        let Some((encoding, path)) = layout.readable_shard(key, month, true) else {
            continue;
        };
        let records = match encoding {
            ShardEncoding::Binary => fs::metadata(&path)?.len() / BINARY_RECORD_SIZE as u64,
            ShardEncoding::Text => count_lines(&path)?,
        };
        let source = match encoding {
            ShardEncoding::Binary => "binary",
            ShardEncoding::Text => "text",
        };
        println!("{:<8} {:>12}  {}", month.to_string(), records, source);
    }
    Ok(())
}

fn count_lines(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut n = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            n += 1;
        }
    }
    Ok(n)
}

fn run_retention(config: &StoreConfig, now_ms: i64) -> Result<()> {
    let policy = config.retention_policy()?;
    let targets = policy.cleanup_targets(now_ms);
    if targets.is_empty() {
        println!("Retention policy has no tiers; nothing is ever deleted");
        return Ok(());
    }
    println!("As of {}:", format_ms(now_ms));
    for (tier, target) in policy.tiers().iter().zip(&targets) {
        println!(
            "  timeframe <= {:>6}s  max age {:>4}d  delete before {}",
            target.timeframe_ceiling_secs,
            tier.max_age_secs / 86_400,
            format_ms(target.cutoff_ms)
        );
    }
    Ok(())
}

/// Accepts RFC 3339, `YYYY-MM-DD` (midnight UTC) or epoch milliseconds.
fn parse_time(s: &str) -> Result<i64> {
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    bail!("cannot parse time '{s}' (expected RFC 3339, YYYY-MM-DD or epoch ms)")
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_time_formats() {
        assert_eq!(parse_time("1704067200000").unwrap(), 1_704_067_200_000);
        assert_eq!(parse_time("2024-01-01").unwrap(), 1_704_067_200_000);
        assert_eq!(
            parse_time("2024-01-01T00:00:01Z").unwrap(),
            1_704_067_201_000
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn import_then_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        fs::write(
            &input,
            "timestamp_ms,bid,ask,last,volume,direction\n\
             1704067200000,1.5,1.6,1.55,10,1\n\
             1706745600000,1.7,1.8,1.75,5,-1\n",
        )
        .unwrap();

        let layout = ShardLayout::new(dir.path().join("ticks"));
        let key = MarketKey::new("b", "EURUSD");
        assert_eq!(import_csv(&layout, key.clone(), TickFormat::Both, &input).unwrap(), 2);
        assert_eq!(layout.list_months(&key).unwrap().len(), 2);

        let out = dir.path().join("out.csv");
        let cursor = TickStreamCursor::new(layout, key, 0, i64::MAX / 4, 100, true);
        assert_eq!(export_csv(cursor, &out).unwrap(), 2);
        let exported = fs::read_to_string(&out).unwrap();
        assert!(exported.starts_with("timestamp_ms,bid,ask,last,volume,direction"));
        let last_row = exported.lines().last().unwrap();
        assert!(last_row.starts_with("1706745600000,1.7,1.8,1.75,"));
        assert!(last_row.ends_with(",-1"));
    }

    #[test]
    fn import_rejects_bad_direction() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        fs::write(
            &input,
            "timestamp_ms,bid,ask,last,volume,direction\n1,1,1,1,1,7\n",
        )
        .unwrap();
        let layout = ShardLayout::new(dir.path());
        assert!(import_csv(&layout, MarketKey::new("b", "m"), TickFormat::Text, &input).is_err());
    }
}
