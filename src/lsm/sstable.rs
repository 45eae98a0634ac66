//! Sorted table file format and codec.
//!
//! A sorted table is a one-shot, immutable file with three sections:
//!
//! ```text
//! [data section]   repeated: [8 B LE length][{"Key","Value","Deleted"} JSON]
//! [sparse index]   repeated: [8 B LE length][{"Key","Offset"} JSON]
//! [footer]         [{"Version","IndexOffset","NumEntries"} JSON][8 B LE length]
//! ```
//!
//! Keys in the data section are strictly increasing. One index entry is
//! sampled per [`INDEX_INTERVAL`] data records, which bounds a point lookup
//! to a short scan window. The footer length sits in the last 8 bytes of the
//! file so a reader can work backwards from the end.
//!
//! A [`Table`] holds only the file path plus the in-memory sparse index and
//! reopens the file per lookup; open table files are never mutated, and
//! replacement goes through a `.tmp` sibling renamed into place.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::errdata;
use crate::error::Result;
use crate::record::Record;

/// Every `INDEX_INTERVAL`th data record gets a sparse index entry.
pub const INDEX_INTERVAL: usize = 16;

/// On-disk format version carried in the footer.
pub const TABLE_VERSION: u64 = 1;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DataRecord {
    key: String,
    value: String,
    deleted: bool,
}

impl From<&Record> for DataRecord {
    fn from(record: &Record) -> Self {
        Self {
            key: record.key.clone(),
            value: record.value.clone(),
            deleted: record.deleted,
        }
    }
}

impl From<DataRecord> for Record {
    fn from(data: DataRecord) -> Self {
        Self {
            key: data.key,
            value: data.value,
            deleted: data.deleted,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IndexEntry {
    key: String,
    offset: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Footer {
    version: u64,
    index_offset: u64,
    num_entries: u64,
}

/// Writes `records` as a sorted table at `path`, going through a `.tmp`
/// sibling and an atomic rename. Records are sorted by key as a safety net;
/// callers normally pass an already-sorted snapshot.
pub fn write_table(path: &Path, mut records: Vec<Record>) -> Result<()> {
    records.sort_by(|a, b| a.key.cmp(&b.key));

    let tmp_path = suffixed(path, ".tmp");
    let file = File::create(&tmp_path)?;
    let result = write_sections(&file, &records);
    drop(file);

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

fn write_sections(file: &File, records: &[Record]) -> Result<()> {
    let mut writer = BufWriter::new(file);
    let mut index: Vec<IndexEntry> = Vec::new();
    let mut offset = 0u64;

    for (i, record) in records.iter().enumerate() {
        if i % INDEX_INTERVAL == 0 {
            index.push(IndexEntry {
                key: record.key.clone(),
                offset,
            });
        }
        let payload = serde_json::to_vec(&DataRecord::from(record))?;
        writer.write_i64::<LittleEndian>(payload.len() as i64)?;
        writer.write_all(&payload)?;
        offset += 8 + payload.len() as u64;
    }

    let index_offset = offset;
    for entry in &index {
        let payload = serde_json::to_vec(entry)?;
        writer.write_i64::<LittleEndian>(payload.len() as i64)?;
        writer.write_all(&payload)?;
    }

    let footer = Footer {
        version: TABLE_VERSION,
        index_offset,
        num_entries: records.len() as u64,
    };
    let payload = serde_json::to_vec(&footer)?;
    writer.write_all(&payload)?;
    // The footer length is the very last thing in the file.
    writer.write_i64::<LittleEndian>(payload.len() as i64)?;

    writer.flush()?;
    file.sync_all()?;
    Ok(())
}

/// An open sorted table: the file path, the in-memory sparse index, and the
/// footer. Lookups reopen the file, so removing a table's file cannot
/// invalidate a handle a concurrent reader already resolved.
pub struct Table {
    path: PathBuf,
    index: Vec<IndexEntry>,
    footer: Footer,
}

impl Table {
    /// Opens a table and loads its sparse index into memory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < 8 {
            return errdata!("table file {} too small ({file_size} bytes)", path.display());
        }

        file.seek(SeekFrom::End(-8))?;
        let footer_length = file.read_i64::<LittleEndian>()?;
        if footer_length < 0 || footer_length as u64 + 8 > file_size {
            return errdata!("invalid footer length {footer_length} in {}", path.display());
        }
        let footer_offset = file_size - 8 - footer_length as u64;

        file.seek(SeekFrom::Start(footer_offset))?;
        let mut payload = vec![0u8; footer_length as usize];
        file.read_exact(&mut payload)?;
        let footer: Footer = serde_json::from_slice(&payload)?;
        if footer.version != TABLE_VERSION {
            return errdata!(
                "unsupported table version {} in {}",
                footer.version,
                path.display()
            );
        }
        if footer.index_offset > footer_offset {
            return errdata!(
                "index offset {} past footer at {} in {}",
                footer.index_offset,
                footer_offset,
                path.display()
            );
        }

        file.seek(SeekFrom::Start(footer.index_offset))?;
        let mut reader = BufReader::new(file);
        let mut index = Vec::new();
        let mut current = footer.index_offset;
        while current < footer_offset {
            let length = reader.read_i64::<LittleEndian>()?;
            if length < 0 {
                return errdata!("negative index entry length {length} in {}", path.display());
            }
            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload)?;
            index.push(serde_json::from_slice::<IndexEntry>(&payload)?);
            current += 8 + length as u64;
        }

        Ok(Self {
            path,
            index,
            footer,
        })
    }

    /// Point lookup. A hit returns the full record, so tombstones are
    /// observable and the layered search above can stop at them. A miss
    /// returns `None`.
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        // Bound the scan window with a binary search over the sparse index:
        // start at the matched sample (exact hit) or its predecessor, end at
        // the successor sample or the data section's end.
        let mut start = 0u64;
        let mut end = self.footer.index_offset;
        if !self.index.is_empty() {
            let idx = self.index.partition_point(|e| e.key.as_str() < key);
            if idx < self.index.len() {
                if self.index[idx].key == key {
                    start = self.index[idx].offset;
                } else if idx > 0 {
                    start = self.index[idx - 1].offset;
                }
                if idx + 1 < self.index.len() {
                    end = self.index[idx + 1].offset;
                }
            } else {
                start = self.index[self.index.len() - 1].offset;
            }
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);
        let mut current = start;
        while current < end {
            let length = match reader.read_i64::<LittleEndian>() {
                Ok(length) => length,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if length < 0 {
                return errdata!("negative record length {length} in {}", self.path.display());
            }
            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload)?;
            current += 8 + length as u64;

            let record: DataRecord = serde_json::from_slice(&payload)?;
            if record.key == key {
                return Ok(Some(record.into()));
            }
            // Records are sorted; once past the key it cannot appear.
            if record.key.as_str() > key {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Reads the whole data section, tombstones included. Used by
    /// compaction.
    pub fn all_records(&self) -> Result<Vec<Record>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::with_capacity(self.footer.num_entries as usize);
        let mut current = 0u64;
        while current < self.footer.index_offset {
            let length = reader.read_i64::<LittleEndian>()?;
            if length < 0 {
                return errdata!("negative record length {length} in {}", self.path.display());
            }
            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload)?;
            current += 8 + length as u64;

            records.push(serde_json::from_slice::<DataRecord>(&payload)?.into());
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the data section.
    pub fn num_entries(&self) -> u64 {
        self.footer.num_entries
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }
}

/// Appends `suffix` to the full file name, e.g. `x.sst` -> `x.sst.tmp`.
fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
