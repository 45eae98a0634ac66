//! Hash-indexed append-only storage engine.
//!
//! The database file is a sequence of framed records: an 8-byte little-endian
//! signed length followed by a JSON payload. An in-memory map from key to the
//! byte offset of that key's latest live record gives O(1) point reads; the
//! map is rebuilt by a sequential scan on open, dropping keys whose latest
//! record is a tombstone. The file grows monotonically; this engine has no
//! compaction.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::engine::{validate_key, Engine};
use crate::errdata;
use crate::error::{Error, Result};
use crate::record::Record;

pub struct HashStore {
    path: PathBuf,
    // All operations mutate or consult the index, so a single mutex covers
    // both the map and the file IO.
    index: Mutex<HashMap<String, u64>>,
}

impl HashStore {
    /// Opens or creates the database at `path`, rebuilding the offset index
    /// from a full sequential scan.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                File::create(&path)?;
                return Ok(Self {
                    path,
                    index: Mutex::new(HashMap::new()),
                });
            }
            Err(e) => return Err(e.into()),
        };

        // Latest position and tombstone flag per key, in file order.
        let mut latest: HashMap<String, (u64, bool)> = HashMap::new();
        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        loop {
            let length = match reader.read_i64::<LittleEndian>() {
                Ok(length) => length,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if length < 0 {
                return errdata!("negative record length {length} at offset {offset}");
            }
            let mut payload = vec![0u8; length as usize];
            reader.read_exact(&mut payload)?;

            let record = Record::decode(&payload).ok_or_else(|| {
                Error::Corruption(format!("undecodable record at offset {offset}"))
            })?;
            latest.insert(record.key, (offset, record.deleted));

            offset += 8 + length as u64;
        }

        let index = latest
            .into_iter()
            .filter(|(_, (_, deleted))| !deleted)
            .map(|(key, (offset, _))| (key, offset))
            .collect();

        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    /// Appends one framed record at the end of the file and returns the byte
    /// offset of its length prefix.
    fn append(&self, record: &Record, sync: bool) -> Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)?;
        let offset = file.seek(SeekFrom::End(0))?;

        let payload = record.encode()?;
        file.write_i64::<LittleEndian>(payload.len() as i64)?;
        file.write_all(&payload)?;
        if sync {
            file.sync_all()?;
        }
        Ok(offset)
    }
}

impl Engine for HashStore {
    fn write(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let mut index = self.index.lock()?;
        let offset = self.append(&Record::new(key, value), false)?;
        index.insert(key.to_string(), offset);
        Ok(())
    }

    fn read(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let index = self.index.lock()?;
        let offset = *index.get(key).ok_or(Error::NotFound)?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let length = file.read_i64::<LittleEndian>()?;
        if length < 0 {
            return errdata!("negative record length {length} at offset {offset}");
        }
        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)?;

        let record = Record::decode(&payload)
            .ok_or_else(|| Error::Corruption(format!("undecodable record at offset {offset}")))?;
        Ok(record.value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut index = self.index.lock()?;
        // The tombstone is unconditional: absent keys get one too.
        self.append(&Record::tombstone(key), true)?;
        index.remove(key);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _index = self.index.lock()?;
        // Write appends are not individually fsynced; flush them to stable
        // storage before the instance goes away.
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.sync_all()?;
        Ok(())
    }
}
