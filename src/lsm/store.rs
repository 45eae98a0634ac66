use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::engine::{validate_key, Engine};
use crate::error::{Error, Result};
use crate::record::Record;

use super::memtable::Memtable;
use super::sstable::{self, Table};
use super::{COMPACTION_THRESHOLD, MEMTABLE_FLUSH_THRESHOLD};

const TABLE_PREFIX: &str = "sstable_";
const TABLE_SUFFIX: &str = ".sst";

/// The LSM engine: one memtable plus a stack of immutable sorted tables in a
/// data directory, newest first, named `sstable_NNNNNN.sst` from a monotonic
/// id.
pub struct LsmStore {
    dir: PathBuf,
    state: RwLock<State>,
}

struct State {
    memtable: Memtable,
    // Newest first.
    tables: Vec<Table>,
    next_table_id: u64,
}

/// A point-in-time snapshot of the store's shape, for logging and tests.
#[derive(Clone, Copy, Debug)]
pub struct Stats {
    pub memtable_size: usize,
    pub tables: usize,
    pub next_table_id: u64,
}

impl LsmStore {
    /// Opens or creates the store in directory `dir`, loading every
    /// `sstable_NNNNNN.sst` file present. Stray files, `.tmp` leftovers
    /// included, are ignored.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name
                .strip_prefix(TABLE_PREFIX)
                .and_then(|rest| rest.strip_suffix(TABLE_SUFFIX))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };
            ids.push(id);
        }

        // Newest first.
        ids.sort_unstable_by(|a, b| b.cmp(a));
        let mut tables = Vec::with_capacity(ids.len());
        for &id in &ids {
            tables.push(Table::open(table_path(&dir, id))?);
        }
        let next_table_id = ids.first().map_or(0, |&max| max + 1);

        tracing::info!(
            dir = %dir.display(),
            tables = tables.len(),
            next_table_id,
            "Opened LSM store"
        );

        Ok(Self {
            dir,
            state: RwLock::new(State {
                memtable: Memtable::new(),
                tables,
                next_table_id,
            }),
        })
    }

    /// Flushes the memtable (unless empty) as a new sorted table at the
    /// front of the stack.
    fn flush_locked(&self, state: &mut State) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }

        let entries = state.memtable.sorted_entries();
        let id = state.next_table_id;
        state.next_table_id += 1;

        let path = table_path(&self.dir, id);
        sstable::write_table(&path, entries)?;
        let table = Table::open(&path)?;

        tracing::info!(table_id = id, entries = table.num_entries(), "Flushed memtable");

        state.tables.insert(0, table);
        state.memtable.clear();
        Ok(())
    }

    /// Compacts when the stack has reached the threshold. Runs after every
    /// flush, explicit or threshold-triggered.
    fn maybe_compact_locked(&self, state: &mut State) -> Result<()> {
        if state.tables.len() >= COMPACTION_THRESHOLD {
            self.compact_locked(state)?;
        }
        Ok(())
    }

    /// Merges all tables into one, keeping the newest record per key and
    /// dropping keys whose newest record is a tombstone. With fewer than two
    /// tables there is nothing to merge.
    fn compact_locked(&self, state: &mut State) -> Result<()> {
        if state.tables.len() < 2 {
            return Ok(());
        }

        // Oldest to newest, so newer records overwrite older ones.
        let mut latest: BTreeMap<String, Record> = BTreeMap::new();
        for table in state.tables.iter().rev() {
            for record in table.all_records()? {
                latest.insert(record.key.clone(), record);
            }
        }

        let merged = state.tables.len();
        let survivors: Vec<Record> = latest.into_values().filter(|r| !r.deleted).collect();

        if survivors.is_empty() {
            // Everything was deleted; drop all tables.
            for table in state.tables.drain(..) {
                fs::remove_file(table.path())?;
            }
            tracing::info!(merged, "Compacted away all tables");
            return Ok(());
        }

        let id = state.next_table_id;
        state.next_table_id += 1;
        let path = table_path(&self.dir, id);
        let surviving = survivors.len();
        sstable::write_table(&path, survivors)?;
        let table = Table::open(&path)?;

        // The new table is in place; the old files can go. A crash before
        // this point leaves the old stack intact, and newer ids dominate
        // older ones on the next open either way.
        for old in state.tables.drain(..) {
            if let Err(e) = fs::remove_file(old.path()) {
                tracing::warn!(path = %old.path().display(), error = %e, "Failed to remove old table");
            }
        }
        state.tables.push(table);

        tracing::info!(table_id = id, merged, surviving, "Compacted tables");
        Ok(())
    }

    /// Current shape of the store.
    pub fn stats(&self) -> Result<Stats> {
        let state = self.state.read()?;
        Ok(Stats {
            memtable_size: state.memtable.size(),
            tables: state.tables.len(),
            next_table_id: state.next_table_id,
        })
    }
}

impl Engine for LsmStore {
    fn write(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let mut state = self.state.write()?;
        state.memtable.put(key, value);
        if state.memtable.size() >= MEMTABLE_FLUSH_THRESHOLD {
            self.flush_locked(&mut state)?;
            self.maybe_compact_locked(&mut state)?;
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let state = self.state.read()?;

        // Memtable first; a tombstone there answers without consulting any
        // older table.
        if let Some(record) = state.memtable.entry(key) {
            return if record.deleted {
                Err(Error::NotFound)
            } else {
                Ok(record.value)
            };
        }

        // Then the stack, newest to oldest; the first hit wins.
        for table in &state.tables {
            if let Some(record) = table.get(key)? {
                return if record.deleted {
                    Err(Error::NotFound)
                } else {
                    Ok(record.value)
                };
            }
        }
        Err(Error::NotFound)
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut state = self.state.write()?;
        state.memtable.delete(key);
        if state.memtable.size() >= MEMTABLE_FLUSH_THRESHOLD {
            self.flush_locked(&mut state)?;
            self.maybe_compact_locked(&mut state)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.write()?;
        self.flush_locked(&mut state)?;
        self.maybe_compact_locked(&mut state)
    }

    fn compact(&self) -> Result<()> {
        let mut state = self.state.write()?;
        self.flush_locked(&mut state)?;
        self.compact_locked(&mut state)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write()?;
        self.flush_locked(&mut state)
    }
}

fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{TABLE_PREFIX}{id:06}{TABLE_SUFFIX}"))
}
