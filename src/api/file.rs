//! Purpose: Application-facing handle for one record file and its single scan pass.
//! Exports: `JsonFile`, `FileOptions`.
//! Role: Owns the store and the handoff queue; hands out the scanner exactly once.
//! Invariants: `concurrency` sentinels are queued per scan, one per consumer.
//! Invariants: Lazy handles never keep the store alive; `close` invalidates them.
#![allow(clippy::result_large_err)]

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::handle::LazyHandle;
use crate::core::handoff::{Consumer, DEFAULT_CAPACITY, Entry, HandoffQueue};
use crate::core::scan::ScannerLoop;
use crate::core::store::{DEFAULT_READ_BUFFER, LineReader, RecordStore, StoreOptions};
use crate::json::parse;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileOptions {
    /// Number of consumers draining the queue; one sentinel is sent to each.
    pub concurrency: usize,
    /// Maximum number of queued entries before the scanner blocks.
    pub capacity: usize,
    /// Bytes fetched per positioned read while scanning.
    pub read_buffer: usize,
    /// Create the file if it does not exist.
    pub create: bool,
}

impl FileOptions {
    pub fn new() -> Self {
        Self {
            concurrency: 1,
            capacity: DEFAULT_CAPACITY,
            read_buffer: DEFAULT_READ_BUFFER,
            create: false,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("concurrency must be at least 1")
                .with_hint("Pass the number of consumer workers that will call take()."));
        }
        if self.capacity == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("capacity must be at least 1"));
        }
        if self.read_buffer == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("read buffer must be at least 1"));
        }
        Ok(())
    }
}

impl Default for FileOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A newline-delimited JSON record file opened for one fan-out scan and
/// any number of positioned re-reads.
///
/// Typical use: move `scanner()` onto its own thread and `run` it, start
/// `concurrency` workers that call `take()` until they see
/// `Entry::Sentinel`, and keep `(offset, length)` pairs to rebuild records
/// later through `json_factory`.
#[derive(Debug)]
pub struct JsonFile {
    store: Arc<RecordStore>,
    queue: HandoffQueue,
    options: FileOptions,
}

impl JsonFile {
    pub fn open(path: impl AsRef<Path>, options: FileOptions) -> Result<Self, Error> {
        options.validate()?;
        let store = RecordStore::open(path, StoreOptions::new().create(options.create))?;
        let queue = HandoffQueue::bounded(options.capacity)?;
        Ok(Self {
            store: Arc::new(store),
            queue,
            options,
        })
    }

    /// Absolute path of the record file.
    pub fn name(&self) -> String {
        self.store.name()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn options(&self) -> FileOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Number of entries currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The producer for this file's single scan pass.
    ///
    /// Only one scanner is ever created; a second call is a usage error.
    pub fn scanner(&self) -> Result<ScannerLoop, Error> {
        let producer = self.queue.producer().map_err(|err| {
            err.with_path(self.store.path())
                .with_hint("Open the file again to scan it a second time.")
        })?;
        let reader = LineReader::new(Arc::clone(&self.store), self.options.read_buffer);
        Ok(ScannerLoop::new(reader, producer, self.options.concurrency))
    }

    /// Blocks until the next entry is available.
    ///
    /// A consumer that receives `Entry::Sentinel` must stop calling `take`.
    pub fn take(&self) -> Result<Entry, Error> {
        self.queue.take()
    }

    /// A detached receiving handle for a consumer thread.
    pub fn consumer(&self) -> Consumer {
        self.queue.consumer()
    }

    /// Builds a handle that re-reads the record at `offset` on every use.
    pub fn json_factory(&self, offset: u64, length: u32) -> LazyHandle {
        LazyHandle::new(&self.store, offset, length)
    }

    /// Appends one JSON object as a new line and returns a handle to it.
    pub fn append_json(&self, value: &Value) -> Result<LazyHandle, Error> {
        if !value.is_object() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("record must be a JSON object")
                .with_path(self.store.path()));
        }
        let text = parse::to_text(value)?;
        let (offset, length) = self.store.append(text.as_bytes())?;
        Ok(self.json_factory(offset, length))
    }

    /// Releases the file. Handles created by `json_factory` fail afterwards.
    pub fn close(&self) -> Result<(), Error> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::{FileOptions, JsonFile};
    use crate::core::error::ErrorKind;
    use crate::core::handle::Record;
    use serde_json::json;

    #[test]
    fn defaults_match_reference_values() {
        let options = FileOptions::default();
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.capacity, 1000);
        assert_eq!(options.read_buffer, 64 * 1024);
        assert!(!options.create);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.jsonl");
        for options in [
            FileOptions::new().create(true).concurrency(0),
            FileOptions::new().create(true).capacity(0),
            FileOptions::new().create(true).read_buffer(0),
        ] {
            let err = JsonFile::open(&path, options).expect_err("invalid");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn second_scanner_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.jsonl");
        let file = JsonFile::open(&path, FileOptions::new().create(true)).expect("open");
        let _scanner = file.scanner().expect("scanner");
        let err = file.scanner().expect_err("second scanner");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.path().is_some());
    }

    #[test]
    fn append_json_round_trips_through_lazy_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.jsonl");
        let file = JsonFile::open(&path, FileOptions::new().create(true)).expect("open");

        let first = file.append_json(&json!({"id": 1})).expect("append");
        let second = file.append_json(&json!({"id": 2, "tags": ["x"]})).expect("append");
        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), u64::from(first.length()) + 1);
        assert_eq!(second.json().expect("json"), json!({"id": 2, "tags": ["x"]}));

        let err = file.append_json(&json!([1, 2])).expect_err("not an object");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
