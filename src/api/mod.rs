//! Purpose: Define the stable public Rust API boundary for recfile.
//! Exports: Core types and operations needed by the CLI and embedding applications.
//! Role: Public, additive-only surface over the core modules.
//! Invariants: Callers reach storage primitives through this module's re-exports.

mod file;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::handle::{EagerHandle, LazyHandle, Record, RecordHandle};
pub use crate::core::handoff::{Consumer, DEFAULT_CAPACITY, Entry, HandoffQueue, Producer};
pub use crate::core::scan::{LineSource, ScanEnd, ScanReport, ScannerLoop};
pub use crate::core::store::{
    DEFAULT_READ_BUFFER, IndexedLine, LineReader, RecordStore, StoreOptions,
};
pub use file::{FileOptions, JsonFile};
