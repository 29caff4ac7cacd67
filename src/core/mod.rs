// Core modules implementing record storage, handles, handoff, and scanning.
pub mod error;
pub mod handle;
pub mod handoff;
pub mod scan;
pub mod store;
