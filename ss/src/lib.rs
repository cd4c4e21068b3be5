//! StateStore - durable JSON key/value state on SQLite
//!
//! Holds small, frequently mutated records (counters, cursors, watermarks)
//! that must survive process restarts and be safe to mutate from several
//! processes at once.
//!
//! # Architecture
//!
//! ```text
//! state.db
//! └── kv
//!     ├── key         TEXT PRIMARY KEY
//!     ├── value       TEXT   # JSON document
//!     └── updated_at  TEXT   # RFC 3339
//! ```
//!
//! Every [`Store::update`] runs inside a `BEGIN IMMEDIATE` transaction, so a
//! read-modify-write either fully applies or leaves the record untouched.
//!
//! # Example
//!
//! ```ignore
//! use statestore::Store;
//!
//! let mut store = Store::open("state.db")?;
//! let updated = store.update("hits", |prev: Option<u64>| prev.unwrap_or(0) + 1)?;
//! assert_eq!(updated.current, 1);
//! ```

pub mod cli;
pub mod config;
mod store;

pub use store::{Entry, Store, StoreError, Updated};

/// Default busy timeout applied to every connection (ms)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
