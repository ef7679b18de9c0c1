//! Local mirror store: the durable, authoritative copy of every collection.
//!
//! Collections are kept as ordered JSON lists in a string key-value store
//! (SQLite on disk, or in memory for tests), together with the bookkeeping
//! the sync engine needs: which ids the remote has confirmed and which
//! writes are still waiting to be sent.

mod mirror;
mod storage;
mod traits;

pub use mirror::{outbox_key, synced_key, MirrorStore};
pub use storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use traits::{generate_id, PendingWrite, Record};
