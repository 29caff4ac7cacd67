//! Purpose: Record handles that yield a record's JSON, text, and file coordinates.
//! Exports: `Record`, `EagerHandle`, `LazyHandle`, `RecordHandle`.
//! Role: Uniform value abstraction for records in memory or on disk.
//! Invariants: `EagerHandle` narrows bytes -> text -> parsed JSON and never regresses.
//! Invariants: `LazyHandle` never caches; every call is a fresh positioned read.
//! Invariants: Text of a parsed record is its compact serialization in both variants.
//! Invariants: Offset and length are fixed at construction.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::store::{IndexedLine, RecordStore};
use crate::json::parse;

/// Access to one record and its location in the backing file.
pub trait Record {
    /// Parses the record. The value is always a JSON object.
    fn json(&self) -> Result<Value, Error>;

    /// The record as UTF-8 text.
    fn text(&self) -> Result<String, Error>;

    /// Byte offset of the first byte of the record.
    fn offset(&self) -> u64;

    /// Record length in bytes, excluding the line terminator.
    fn length(&self) -> u32;
}

#[derive(Debug)]
enum Repr {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

/// A record already in memory; decoded and parsed on first use and cached.
#[derive(Debug)]
pub struct EagerHandle {
    repr: Mutex<Repr>,
    offset: u64,
    length: u32,
}

impl EagerHandle {
    pub fn new(bytes: Vec<u8>, offset: u64) -> Result<Self, Error> {
        let length = record_length(bytes.len(), offset)?;
        Ok(Self {
            repr: Mutex::new(Repr::Bytes(bytes)),
            offset,
            length,
        })
    }

    pub fn from_line(line: IndexedLine) -> Result<Self, Error> {
        Self::new(line.bytes, line.offset)
    }

    /// Forces the upgrade to the parsed form, reporting malformed records.
    pub fn parse(&self) -> Result<(), Error> {
        self.json().map(|_| ())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Repr>, Error> {
        self.repr.lock().map_err(|_| {
            Error::new(ErrorKind::Internal)
                .with_message("record handle lock poisoned")
                .with_offset(self.offset)
        })
    }
}

impl Record for EagerHandle {
    fn json(&self) -> Result<Value, Error> {
        let mut repr = self.lock()?;
        let value = match &*repr {
            Repr::Json(value) => return Ok(value.clone()),
            Repr::Text(text) => parse::parse_record(text, self.offset, self.length)?,
            Repr::Bytes(bytes) => {
                let text = parse::decode_utf8(bytes, self.offset, self.length)?;
                parse::parse_record(text, self.offset, self.length)?
            }
        };
        *repr = Repr::Json(value.clone());
        Ok(value)
    }

    fn text(&self) -> Result<String, Error> {
        let mut repr = self.lock()?;
        let text = match &*repr {
            // Re-serialized so text and parsed value never disagree.
            Repr::Json(value) => return parse::to_text(value),
            Repr::Text(text) => return Ok(text.clone()),
            Repr::Bytes(bytes) => parse::decode_utf8(bytes, self.offset, self.length)?.to_owned(),
        };
        *repr = Repr::Text(text.clone());
        Ok(text)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn length(&self) -> u32 {
        self.length
    }
}

/// A record located by coordinates only; re-read from the store on every call.
///
/// Holds a non-owning reference: once the store is closed or dropped every
/// getter fails with `ErrorKind::Io`.
#[derive(Clone, Debug)]
pub struct LazyHandle {
    offset: u64,
    length: u32,
    store: Weak<RecordStore>,
}

impl LazyHandle {
    pub fn new(store: &Arc<RecordStore>, offset: u64, length: u32) -> Self {
        Self {
            offset,
            length,
            store: Arc::downgrade(store),
        }
    }

    /// Path of the backing file, while the store is alive.
    pub fn path(&self) -> Option<PathBuf> {
        self.store.upgrade().map(|store| store.path().to_path_buf())
    }

    fn load(&self) -> Result<(Arc<RecordStore>, Vec<u8>), Error> {
        let store = self.store.upgrade().ok_or_else(|| {
            Error::new(ErrorKind::Io)
                .with_message("record store has been dropped")
                .with_offset(self.offset)
                .with_length(self.length)
        })?;
        let bytes = store.read_at(self.offset, self.length)?;
        Ok((store, bytes))
    }
}

impl Record for LazyHandle {
    fn json(&self) -> Result<Value, Error> {
        let (store, bytes) = self.load()?;
        parse::decode_utf8(&bytes, self.offset, self.length)
            .and_then(|text| parse::parse_record(text, self.offset, self.length))
            .map_err(|err| err.with_path(store.path()))
    }

    /// Canonical compact form, identical to a parsed `EagerHandle`'s text.
    fn text(&self) -> Result<String, Error> {
        self.json().and_then(|value| parse::to_text(&value))
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn length(&self) -> u32 {
        self.length
    }
}

/// Either handle variant, chosen at construction time.
#[derive(Debug)]
pub enum RecordHandle {
    Eager(EagerHandle),
    Lazy(LazyHandle),
}

impl RecordHandle {
    fn inner(&self) -> &dyn Record {
        match self {
            RecordHandle::Eager(handle) => handle,
            RecordHandle::Lazy(handle) => handle,
        }
    }
}

impl Record for RecordHandle {
    fn json(&self) -> Result<Value, Error> {
        self.inner().json()
    }

    fn text(&self) -> Result<String, Error> {
        self.inner().text()
    }

    fn offset(&self) -> u64 {
        self.inner().offset()
    }

    fn length(&self) -> u32 {
        self.inner().length()
    }
}

impl From<EagerHandle> for RecordHandle {
    fn from(handle: EagerHandle) -> Self {
        RecordHandle::Eager(handle)
    }
}

impl From<LazyHandle> for RecordHandle {
    fn from(handle: LazyHandle) -> Self {
        RecordHandle::Lazy(handle)
    }
}

fn record_length(len: usize, offset: u64) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_| {
        Error::new(ErrorKind::Malformed)
            .with_message("record exceeds the maximum record length")
            .with_offset(offset)
    })
}
