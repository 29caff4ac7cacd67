//! Purpose: Indexed newline-delimited JSON record files with fan-out scanning.
//! Exports: `core` (store, handles, handoff queue, scanner, errors) and `api` (facade).
//! Role: Library backing the `recfile` binary and embedding applications.
//! Invariants: One scan pass per opened file; records re-fetched by offset and length.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
mod json;
