//! On-disk layout of the tick store.
//!
//! Layout: `{root}/{broker_id}/{market_id}/T/{YYYYMM}{market_id}` (text)
//! and `{root}/{broker_id}/{market_id}/T/{YYYYMM}{market_id}.dat` (binary),
//! one pair of files per calendar month per market.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::month::ShardMonth;
use crate::domain::MarketKey;
use crate::error::ShardError;

const BINARY_EXTENSION: &str = "dat";

/// Which encodings a writer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickFormat {
    Binary,
    Text,
    #[default]
    Both,
}

impl TickFormat {
    pub fn writes_binary(self) -> bool {
        matches!(self, TickFormat::Binary | TickFormat::Both)
    }

    pub fn writes_text(self) -> bool {
        matches!(self, TickFormat::Text | TickFormat::Both)
    }
}

/// Which encoding a single shard file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardEncoding {
    Binary,
    Text,
}

/// Resolves shard paths under a store root.
#[derive(Debug, Clone)]
pub struct ShardLayout {
    root: PathBuf,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every shard of a market.
    pub fn market_dir(&self, key: &MarketKey) -> PathBuf {
        self.root
            .join(&key.broker_id)
            .join(&key.market_id)
            .join("T")
    }

    pub fn text_path(&self, key: &MarketKey, month: ShardMonth) -> PathBuf {
        self.market_dir(key)
            .join(format!("{}{}", month.code(), key.market_id))
    }

    pub fn binary_path(&self, key: &MarketKey, month: ShardMonth) -> PathBuf {
        self.market_dir(key).join(format!(
            "{}{}.{BINARY_EXTENSION}",
            month.code(),
            key.market_id
        ))
    }

    /// Pick the encoding to read for a month: binary when preferred and present,
    /// otherwise text when present.
    pub fn readable_shard(
        &self,
        key: &MarketKey,
        month: ShardMonth,
        prefer_binary: bool,
    ) -> Option<(ShardEncoding, PathBuf)> {
        if prefer_binary {
            let bin = self.binary_path(key, month);
            if bin.is_file() {
                return Some((ShardEncoding::Binary, bin));
            }
        }
        let text = self.text_path(key, month);
        if text.is_file() {
            return Some((ShardEncoding::Text, text));
        }
        None
    }

    /// Every month with at least one shard file for the market, ascending.
    pub fn list_months(&self, key: &MarketKey) -> Result<Vec<ShardMonth>, ShardError> {
        let dir = self.market_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ShardError::io(&dir, e)),
        };

        let mut months = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| ShardError::io(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(month) = parse_shard_name(name, &key.market_id) {
                months.insert(month);
            }
        }
        Ok(months.into_iter().collect())
    }
}

/// Month of a shard file name, if the name belongs to `market_id`.
fn parse_shard_name(name: &str, market_id: &str) -> Option<ShardMonth> {
    let stem = name
        .strip_suffix(&format!(".{BINARY_EXTENSION}"))
        .unwrap_or(name);
    let code = stem.strip_suffix(market_id)?;
    ShardMonth::parse_code(code)
}
