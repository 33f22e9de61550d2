//! Snapshot store: persisted areas, items, events, deliveries, and runs.
//!
//! Backed by SQLite. The store is the only holder of mutable state; each
//! area's cycle commits atomically through [`SqliteStore::apply_cycle`],
//! which is also where the event recorder's idempotence check lives.

pub mod sqlite;

pub use sqlite::{RecordedChanges, SqliteStore};
