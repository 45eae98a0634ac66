use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::record::Record;

/// In-memory table of the most recent write per key, tombstones included.
///
/// Backed by a skip map, so snapshots come out in ascending key order.
/// Tracks an approximate byte size: the sum of key lengths plus live value
/// lengths. Mutations are serialized by the owning store's writer lock; the
/// map itself supports concurrent readers.
pub struct Memtable {
    entries: SkipMap<String, Record>,
    size: AtomicUsize,
}

fn cost(record: &Record) -> usize {
    if record.deleted {
        record.key.len()
    } else {
        record.key.len() + record.value.len()
    }
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Inserts or replaces the record for `key`.
    pub fn put(&self, key: &str, value: &str) {
        self.apply(Record::new(key, value));
    }

    /// Inserts a tombstone for `key`.
    pub fn delete(&self, key: &str) {
        self.apply(Record::tombstone(key));
    }

    fn apply(&self, record: Record) {
        if let Some(old) = self.entries.get(&record.key) {
            self.size.fetch_sub(cost(old.value()), Ordering::SeqCst);
        }
        self.size.fetch_add(cost(&record), Ordering::SeqCst);
        self.entries.insert(record.key.clone(), record);
    }

    /// Returns the live value for `key`; misses on absence and tombstones.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entry(key).filter(|r| !r.deleted).map(|r| r.value)
    }

    /// Returns the latest record for `key`, tombstone or not. The layered
    /// read path needs the tombstone to stop searching older tables.
    pub fn entry(&self, key: &str) -> Option<Record> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Approximate size in bytes.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all records, tombstones included, in ascending key order.
    pub fn sorted_entries(&self) -> Vec<Record> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        while self.entries.pop_front().is_some() {}
        self.size.store(0, Ordering::SeqCst);
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}
