//! Durable Item Codec
//!
//! Converts an [`Item`] to the byte record stored in the embedded engine and
//! back. The record layout is fixed here rather than left to an encoding
//! library's defaults:
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────────────────────┐
//! │ version │ payload                                                  │
//! │  (u8)   │ bincode 2, standard config (varint, little endian) of    │
//! │  0x01   │ Record { value: RecordValue, expire_at_ms: Option<i64> } │
//! └─────────┴──────────────────────────────────────────────────────────┘
//! ```
//!
//! `expire_at_ms` is milliseconds since the Unix epoch; `None` and `Some(0)`
//! both mean the item never expires.

use crate::storage::item::{Item, Value};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Current record format version.
pub const FORMAT_VERSION: u8 = 1;

/// Errors that can occur while encoding or decoding a record.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The record has no bytes at all
    #[error("empty record")]
    Empty,

    /// The version byte is not one this codec understands
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),

    /// The payload decoded but bytes were left over
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Deserialization failed
    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Serializes items for the durable store.
///
/// One codec is chosen when the store is opened and used for every record.
pub trait ItemCodec: Send + Sync {
    fn encode(&self, item: &Item) -> Result<Bytes, CodecError>;

    fn decode(&self, record: &[u8]) -> Result<Item, CodecError>;
}

/// The default codec: a version byte followed by a bincode payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[derive(Debug, Serialize, Deserialize)]
enum RecordValue {
    String(String),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    value: RecordValue,
    expire_at_ms: Option<i64>,
}

impl From<&Item> for Record {
    fn from(item: &Item) -> Self {
        let value = match &item.value {
            Value::String(s) => RecordValue::String(s.clone()),
            Value::Hash(h) => RecordValue::Hash(h.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Value::List(l) => RecordValue::List(l.iter().cloned().collect()),
        };
        Self {
            value,
            expire_at_ms: item.expire_at.map(|at| at.timestamp_millis()),
        }
    }
}

impl From<Record> for Item {
    fn from(record: Record) -> Self {
        let value = match record.value {
            RecordValue::String(s) => Value::String(s),
            RecordValue::Hash(h) => Value::Hash(h.into_iter().collect()),
            RecordValue::List(l) => Value::List(l.into_iter().collect()),
        };
        let expire_at = record
            .expire_at_ms
            .filter(|ms| *ms != 0)
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        Item::with_expire_at(value, expire_at)
    }
}

impl ItemCodec for BincodeCodec {
    fn encode(&self, item: &Item) -> Result<Bytes, CodecError> {
        let payload =
            bincode::serde::encode_to_vec(Record::from(item), bincode::config::standard())?;

        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.put_u8(FORMAT_VERSION);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    fn decode(&self, record: &[u8]) -> Result<Item, CodecError> {
        let (&version, payload) = record.split_first().ok_or(CodecError::Empty)?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let (record, consumed): (Record, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
        if consumed != payload.len() {
            return Err(CodecError::TrailingBytes(payload.len() - consumed));
        }
        Ok(record.into())
    }
}
