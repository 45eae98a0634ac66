use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::{errinput, HashStore, LogStore, LsmStore};

/// The common contract all storage engines satisfy.
///
/// Engines map non-empty string keys to string values with latest-writer-wins
/// semantics. Deletion writes a tombstone; reading a tombstoned or unwritten
/// key reports a typed absence ([`Error::NotFound`], or [`Error::Deleted`]
/// for engines that distinguish it). Within one instance, operations are
/// linearizable.
pub trait Engine: Send + Sync {
    /// Durably records that `key` maps to `value`. The value may be empty.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the current effective value for `key`.
    fn read(&self, key: &str) -> Result<String>;

    /// Durably records a tombstone for `key`. Deleting a nonexistent key is
    /// not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Flushes any volatile state and releases resources. Idempotent.
    fn close(&self) -> Result<()>;

    /// Merges records to discard superseded versions and tombstones.
    fn compact(&self) -> Result<()> {
        errinput!("compact is not supported by this engine")
    }

    /// Persists any volatile in-memory state without closing.
    fn flush(&self) -> Result<()> {
        errinput!("flush is not supported by this engine")
    }
}

/// Rejects the empty key, which no engine accepts for any operation.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return errinput!("key must not be empty");
    }
    Ok(())
}

/// Selects one of the three storage engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Append-only JSON-line log with whole-file compaction.
    Log,
    /// Append-only binary log with an in-memory byte-offset index.
    Hash,
    /// Log-structured merge-tree over sorted tables.
    Sstable,
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(EngineKind::Log),
            "hash" => Ok(EngineKind::Hash),
            "sstable" => Ok(EngineKind::Sstable),
            other => errinput!("unknown engine type: {other}"),
        }
    }
}

impl Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EngineKind::Log => write!(f, "log"),
            EngineKind::Hash => write!(f, "hash"),
            EngineKind::Sstable => write!(f, "sstable"),
        }
    }
}

/// Opens the engine of the given kind at `path`. For `log` and `hash` the
/// path names a file; for `sstable` it names a data directory.
pub fn open_engine(kind: EngineKind, path: &Path) -> Result<Box<dyn Engine>> {
    Ok(match kind {
        EngineKind::Log => Box::new(LogStore::open(path)?),
        EngineKind::Hash => Box::new(HashStore::open(path)?),
        EngineKind::Sstable => Box::new(LsmStore::open(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("log".parse::<EngineKind>(), Ok(EngineKind::Log));
        assert_eq!("hash".parse::<EngineKind>(), Ok(EngineKind::Hash));
        assert_eq!("sstable".parse::<EngineKind>(), Ok(EngineKind::Sstable));
        assert!("btree".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(validate_key("").is_err());
        assert!(validate_key("k").is_ok());
    }
}
