//! Log-structured merge-tree storage engine.
//!
//! Writes land in an in-memory [`Memtable`]; when it reaches
//! [`MEMTABLE_FLUSH_THRESHOLD`] it is flushed as an immutable sorted table
//! on disk. Reads consult the memtable first, then the table stack from
//! newest to oldest, stopping at the first record found (a tombstone there
//! answers "absent"). Once the stack reaches [`COMPACTION_THRESHOLD`]
//! tables after a flush, all tables are merged into one, dropping
//! superseded records and tombstones.
//!
//! There are no background workers: flushing and compaction run
//! synchronously on the thread whose write crossed the threshold, under the
//! store's writer lock.

pub mod memtable;
pub mod sstable;
mod store;

pub use memtable::Memtable;
pub use sstable::Table;
pub use store::{LsmStore, Stats};

/// Memtable size in bytes at which a write triggers a flush.
pub const MEMTABLE_FLUSH_THRESHOLD: usize = 1024 * 1024; // 1MB

/// Number of tables that triggers compaction after a flush.
pub const COMPACTION_THRESHOLD: usize = 4;
