use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single logical key/value mapping. A record with `deleted = true` is a
/// tombstone; its value is empty by convention, but only the flag marks
/// deletion.
///
/// Two JSON wire shapes exist. The current shape is the serialized form of
/// this struct: `{"key": K, "value": V, "deleted": D}`. The legacy shape is a
/// single-entry object `{K: V}`, always a live record. Write paths emit only
/// the current shape; [`Record::decode`] accepts both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    pub key: String,
    pub value: String,
    pub deleted: bool,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            key: String::new(),
            value: String::new(),
            deleted: false,
        }
    }
}

impl Record {
    /// A live record mapping `key` to `value`.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            deleted: false,
        }
    }

    /// A tombstone marking `key` as deleted.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            deleted: true,
        }
    }

    /// Serializes the record in the current wire shape.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a JSON payload, trying the current shape first and falling
    /// back to the legacy single-entry shape. Returns `None` for payloads
    /// that match neither; callers decide whether skipping is safe.
    ///
    /// Missing fields in the current shape default to zero values, so a
    /// legacy payload decodes "successfully" with an empty key; the empty-key
    /// check routes it to the legacy path.
    pub fn decode(payload: &[u8]) -> Option<Record> {
        if let Ok(record) = serde_json::from_slice::<Record>(payload) {
            if !record.key.is_empty() {
                return Some(record);
            }
        }
        let legacy: BTreeMap<String, String> = serde_json::from_slice(payload).ok()?;
        if legacy.len() != 1 {
            return None;
        }
        let (key, value) = legacy.into_iter().next()?;
        if key.is_empty() {
            return None;
        }
        Some(Record::new(key, value))
    }
}
