//! Append-only JSON-line storage engine.
//!
//! The database is a single file of newline-delimited JSON records, in write
//! order. Reads scan the whole file and keep the latest record for the
//! requested key; deletes append tombstones. Compaction rewrites the file
//! with one live record per key and atomically renames it into place. A
//! sibling `<path>.lock` file excludes concurrent instances across
//! processes; a reader/writer lock serializes threads within one instance.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::engine::{validate_key, Engine};
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::record::Record;

/// File size at or above which an existing database is compacted on open.
pub const COMPACT_THRESHOLD: u64 = 1024 * 1024; // 1MB

pub struct LogStore {
    path: PathBuf,
    // Serializes writers against each other and excludes readers during a
    // write. Held for the whole of every operation.
    ops: RwLock<()>,
    // Cross-process lock, held until close().
    lock: Mutex<Option<FileLock>>,
}

impl LogStore {
    /// Opens or creates the database at `path`. Acquires the cross-process
    /// lock, and compacts an existing file that has reached
    /// [`COMPACT_THRESHOLD`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock = FileLock::acquire(suffixed(&path, ".lock"))?;

        match fs::metadata(&path) {
            Ok(meta) => {
                if meta.len() >= COMPACT_THRESHOLD {
                    tracing::info!(path = %path.display(), size = meta.len(), "Compacting log on open");
                    compact_file(&path)?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                File::create(&path)?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            ops: RwLock::new(()),
            lock: Mutex::new(Some(lock)),
        })
    }

    fn append(&self, record: &Record) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = record.encode()?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }
}

impl Engine for LogStore {
    fn write(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let _guard = self.ops.write()?;
        self.append(&Record::new(key, value))
    }

    fn read(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let _guard = self.ops.read()?;

        let file = File::open(&self.path)?;
        let mut latest: Option<Record> = None;
        // Malformed lines (including a torn trailing write) are skipped.
        for line in BufReader::new(file).split(b'\n') {
            let line = line?;
            if let Some(record) = Record::decode(&line) {
                if record.key == key {
                    latest = Some(record);
                }
            }
        }

        match latest {
            None => Err(Error::NotFound),
            Some(record) if record.deleted => Err(Error::Deleted),
            Some(record) => Ok(record.value),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let _guard = self.ops.write()?;
        self.append(&Record::tombstone(key))
    }

    fn compact(&self) -> Result<()> {
        let _guard = self.ops.write()?;
        compact_file(&self.path)
    }

    fn close(&self) -> Result<()> {
        let _guard = self.ops.write()?;
        if let Some(lock) = self.lock.lock()?.take() {
            lock.release()?;
        }
        Ok(())
    }
}

/// Rewrites the file to hold the latest live record per key, in key order,
/// dropping tombstoned keys and malformed lines. The rewrite goes through a
/// sibling temp file renamed over the original.
fn compact_file(path: &Path) -> Result<()> {
    let file = File::open(path)?;
    let mut latest: BTreeMap<String, Record> = BTreeMap::new();
    for line in BufReader::new(file).split(b'\n') {
        let line = line?;
        if let Some(record) = Record::decode(&line) {
            latest.insert(record.key.clone(), record);
        }
    }

    let tmp_path = suffixed(path, ".tmp");
    let mut tmp = File::create(&tmp_path)?;
    let mut surviving = 0usize;
    for record in latest.values() {
        if record.deleted {
            continue;
        }
        let mut line = record.encode()?;
        line.push(b'\n');
        tmp.write_all(&line)?;
        surviving += 1;
    }
    tmp.sync_all()?;
    drop(tmp);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    tracing::info!(path = %path.display(), surviving, "Compacted log file");
    Ok(())
}

/// Appends `suffix` to the full file name, e.g. `db.log` -> `db.log.lock`.
fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_dir() -> TempDir {
        TempDir::new().expect("Failed to create temporary directory")
    }

    fn db_path(dir: &TempDir) -> PathBuf {
        dir.path().join("test.log")
    }

    fn line_count(path: &Path) -> usize {
        fs::read_to_string(path)
            .expect("Failed to read log file")
            .lines()
            .count()
    }

    #[test]
    fn test_write_read_latest_wins() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.write("a", "1").expect("Write failed");
        store.write("b", "2").expect("Write failed");
        store.write("a", "3").expect("Write failed");

        assert_eq!(store.read("a").expect("Read failed"), "3");
        assert_eq!(store.read("b").expect("Read failed"), "2");
    }

    #[test]
    fn test_read_missing_key() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.write("a", "1").expect("Write failed");
        assert_eq!(store.read("nonexistent"), Err(Error::NotFound));
    }

    #[test]
    fn test_delete_then_read() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.write("k", "x").expect("Write failed");
        store.delete("k").expect("Delete failed");
        assert_eq!(store.read("k"), Err(Error::Deleted));
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.delete("never-written").expect("Delete failed");
        assert_eq!(store.read("never-written"), Err(Error::Deleted));
    }

    #[test]
    fn test_delete_then_rewrite() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.write("k", "v1").expect("Write failed");
        store.delete("k").expect("Delete failed");
        store.write("k", "v2").expect("Write failed");
        assert_eq!(store.read("k").expect("Read failed"), "v2");
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        assert!(store.write("", "v").is_err());
        assert!(store.read("").is_err());
        assert!(store.delete("").is_err());
    }

    #[test]
    fn test_legacy_file_read() {
        let dir = create_temp_dir();
        let path = db_path(&dir);
        fs::write(&path, "{\"key1\":\"v1\"}\n{\"key1\":\"v2\"}\n").expect("Failed to seed file");

        let store = LogStore::open(&path).expect("Failed to open store");
        assert_eq!(store.read("key1").expect("Read failed"), "v2");
    }

    #[test]
    fn test_legacy_and_current_coexist() {
        let dir = create_temp_dir();
        let path = db_path(&dir);
        fs::write(&path, "{\"key1\":\"old\"}\n{\"key2\":\"kept\"}\n").expect("Failed to seed file");

        let store = LogStore::open(&path).expect("Failed to open store");
        store.write("key1", "new").expect("Write failed");

        assert_eq!(store.read("key1").expect("Read failed"), "new");
        assert_eq!(store.read("key2").expect("Read failed"), "kept");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = create_temp_dir();
        let path = db_path(&dir);
        fs::write(
            &path,
            "{\"key\":\"a\",\"value\":\"1\",\"deleted\":false}\nmalformed_line\n{\"key\":\"b\",\"value\":\"2\",\"deleted\":false}\n{\"key\":\"a\",\"val",
        )
        .expect("Failed to seed file");

        let store = LogStore::open(&path).expect("Failed to open store");
        assert_eq!(store.read("a").expect("Read failed"), "1");
        assert_eq!(store.read("b").expect("Read failed"), "2");
    }

    #[test]
    fn test_compact_dedups_by_key() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.write("key1", "value1").expect("Write failed");
        store.write("key2", "value2").expect("Write failed");
        store.write("key1", "value3").expect("Write failed");
        store.compact().expect("Compact failed");

        assert_eq!(line_count(&db_path(&dir)), 2);
        assert_eq!(store.read("key1").expect("Read failed"), "value3");
        assert_eq!(store.read("key2").expect("Read failed"), "value2");
    }

    #[test]
    fn test_compact_removes_tombstones() {
        let dir = create_temp_dir();
        let store = LogStore::open(db_path(&dir)).expect("Failed to open store");

        store.write("key1", "value1").expect("Write failed");
        store.write("key2", "value2").expect("Write failed");
        store.delete("key1").expect("Delete failed");
        store.compact().expect("Compact failed");

        assert_eq!(line_count(&db_path(&dir)), 1);
        // After compaction the tombstone is gone entirely.
        assert_eq!(store.read("key1"), Err(Error::NotFound));
        assert_eq!(store.read("key2").expect("Read failed"), "value2");
    }

    #[test]
    fn test_compact_converts_legacy_records() {
        let dir = create_temp_dir();
        let path = db_path(&dir);
        fs::write(&path, "{\"key1\":\"v1\"}\n").expect("Failed to seed file");

        let store = LogStore::open(&path).expect("Failed to open store");
        store.compact().expect("Compact failed");

        let content = fs::read_to_string(&path).expect("Failed to read log file");
        assert_eq!(content, "{\"key\":\"key1\",\"value\":\"v1\",\"deleted\":false}\n");
        assert_eq!(store.read("key1").expect("Read failed"), "v1");
    }

    #[test]
    fn test_open_auto_compacts_large_file() {
        let dir = create_temp_dir();
        let path = db_path(&dir);

        // Many rewrites of a few keys, pushing the file past the threshold.
        let mut content = String::new();
        let filler = "x".repeat(64);
        let mut i = 0;
        while content.len() < COMPACT_THRESHOLD as usize {
            content.push_str(&format!(
                "{{\"key\":\"key{}\",\"value\":\"{}-{}\",\"deleted\":false}}\n",
                i % 10,
                filler,
                i
            ));
            i += 1;
        }
        fs::write(&path, &content).expect("Failed to seed file");
        let size_before = fs::metadata(&path).expect("Failed to stat").len();

        let store = LogStore::open(&path).expect("Failed to open store");
        let size_after = fs::metadata(&path).expect("Failed to stat").len();

        assert!(size_after < size_before);
        assert_eq!(line_count(&path), 10);
        // Latest write for key0 was at the highest index divisible by 10.
        let last_key0 = (i - 1) / 10 * 10;
        assert_eq!(
            store.read("key0").expect("Read failed"),
            format!("{}-{}", filler, last_key0)
        );
    }

    #[test]
    fn test_concurrent_open_excluded() {
        let dir = create_temp_dir();
        let path = db_path(&dir);

        let store = LogStore::open(&path).expect("Failed to open first instance");
        assert!(matches!(LogStore::open(&path), Err(Error::AlreadyInUse)));

        store.close().expect("Close failed");
        let reopened = LogStore::open(&path).expect("Failed to reopen after close");
        reopened.close().expect("Close failed");
    }

    #[test]
    fn test_close_is_idempotent_and_unlinks_lock() {
        let dir = create_temp_dir();
        let path = db_path(&dir);
        let lock_path = suffixed(&path, ".lock");

        let store = LogStore::open(&path).expect("Failed to open store");
        assert!(lock_path.exists());

        store.close().expect("Close failed");
        assert!(!lock_path.exists());
        store.close().expect("Second close failed");
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = create_temp_dir();
        let path = db_path(&dir);

        let store = LogStore::open(&path).expect("Failed to open store");
        store.write("a", "1").expect("Write failed");
        store.write("b", "2").expect("Write failed");
        store.delete("b").expect("Delete failed");
        store.close().expect("Close failed");

        let store = LogStore::open(&path).expect("Failed to reopen store");
        assert_eq!(store.read("a").expect("Read failed"), "1");
        assert_eq!(store.read("b"), Err(Error::Deleted));
    }
}
