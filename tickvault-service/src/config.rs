//! Store configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration
//! (in-memory backend, ticks under `data/ticks`, both encodings).

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use tickvault_core::retention::{RetentionPolicy, RetentionTier};
use tickvault_core::shard::{ShardLayout, TickFormat};

/// Errors raised while loading or validating a [`StoreConfig`]. Fatal at start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unknown backend kind '{0}' (expected memory, postgresql or mysql)")]
    UnknownBackend(String),
    #[error("backend '{backend}' is missing '{field}'")]
    MissingCredentials {
        backend: String,
        field: &'static str,
    },
    #[error("no built-in adapter for backend '{0}'; pass one to Dispatcher::start_with_backend")]
    AdapterUnavailable(String),
}

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Postgresql,
    Mysql,
}

impl BackendKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "postgresql" | "postgres" | "pgsql" => Ok(Self::Postgresql),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            _ => Err(ConfigError::UnknownBackend(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }
}

/// `[backend]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "memory".into(),
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
        }
    }
}

impl BackendConfig {
    /// Resolve the kind and check the credentials it needs.
    pub fn validate(&self) -> Result<BackendKind, ConfigError> {
        let kind = BackendKind::parse(&self.kind)?;
        if kind == BackendKind::Memory {
            return Ok(kind);
        }
        let required = [
            ("host", &self.host),
            ("user", &self.user),
            ("password", &self.password),
            ("database", &self.database),
        ];
        for (field, value) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(ConfigError::MissingCredentials {
                    backend: kind.as_str().to_string(),
                    field,
                });
            }
        }
        Ok(kind)
    }
}

/// Dispatcher and tick store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the tick shard tree.
    pub tick_root: PathBuf,
    pub tick_format: TickFormat,
    pub tick_flush_interval_secs: u64,
    /// Bulk import/fetch mode: flush on every cycle and keep handles open.
    pub continuous_ticks: bool,
    pub cursor_buffer_size: usize,

    pub ohlc_batch_size: usize,
    pub ohlc_flush_interval_secs: u64,
    /// Applies to assets, liquidations, market info and user trades.
    pub entity_batch_size: usize,
    pub entity_flush_interval_secs: u64,

    /// Worker timer tick for time-based thresholds.
    pub wake_interval_ms: u64,
    pub retry_backoff_ms: u64,
    pub drain_max_attempts: u32,
    pub drain_poll_ms: u64,
    /// Pending row count above which a warning is logged. Never blocks producers.
    pub pending_high_water: usize,

    pub auto_cleanup: bool,
    pub cleanup_interval_secs: u64,
    pub retention: Vec<RetentionTier>,

    pub backend: BackendConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tick_root: PathBuf::from("data/ticks"),
            tick_format: TickFormat::Both,
            tick_flush_interval_secs: 60,
            continuous_ticks: false,
            cursor_buffer_size: 1000,
            ohlc_batch_size: 500,
            ohlc_flush_interval_secs: 60,
            entity_batch_size: 100,
            entity_flush_interval_secs: 5,
            wake_interval_ms: 100,
            retry_backoff_ms: 1000,
            drain_max_attempts: 100,
            drain_poll_ms: 100,
            pending_high_water: 1_000_000,
            auto_cleanup: false,
            cleanup_interval_secs: 4 * 3600,
            retention: RetentionPolicy::default().tiers().to_vec(),
            backend: BackendConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Full check, including the `[backend]` table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_store()?;
        self.backend.validate()?;
        Ok(())
    }

    /// Everything except `[backend]`, for callers that bring their own adapter.
    pub fn validate_store(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ohlc_batch_size", self.ohlc_batch_size),
            ("entity_batch_size", self.entity_batch_size),
            ("cursor_buffer_size", self.cursor_buffer_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if self.wake_interval_ms == 0 {
            return Err(ConfigError::Invalid("wake_interval_ms must be > 0".into()));
        }
        if self.auto_cleanup && self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cleanup_interval_secs must be > 0 when auto_cleanup is on".into(),
            ));
        }
        self.retention_policy()?;
        Ok(())
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy, ConfigError> {
        RetentionPolicy::new(self.retention.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn layout(&self) -> ShardLayout {
        ShardLayout::new(&self.tick_root)
    }

    pub fn tick_flush_interval(&self) -> Duration {
        Duration::from_secs(self.tick_flush_interval_secs)
    }

    pub fn ohlc_flush_interval(&self) -> Duration {
        Duration::from_secs(self.ohlc_flush_interval_secs)
    }

    pub fn entity_flush_interval(&self) -> Duration {
        Duration::from_secs(self.entity_flush_interval_secs)
    }

    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
