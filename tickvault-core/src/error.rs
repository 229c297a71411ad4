//! Structured errors for shard I/O.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while writing or reading tick shards.
#[derive(Debug, Error)]
pub enum ShardError {
    /// Disk full, permission denied, missing directory... Retryable by the writer.
    #[error("shard I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Structural damage: a binary file whose size is not a whole number of records,
    /// or a record that cannot be decoded. Terminal for a reader.
    #[error("corrupt shard {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("undecodable line {line} in {}: {reason}", .path.display())]
    Decode {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl ShardError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        ShardError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        ShardError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// True for errors that signal damaged data rather than a failing device.
    pub fn is_corruption(&self) -> bool {
        matches!(self, ShardError::Corrupt { .. } | ShardError::Decode { .. })
    }
}
