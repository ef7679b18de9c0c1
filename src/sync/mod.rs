//! Local-first sync between the mirror store and the remote collection API.
//!
//! - `save` writes the mirror synchronously, queues the write in a durable
//!   outbox and mirrors it to the remote in the background
//! - `load` merges the remote listing with local-only records by id
//! - `delete` is local only; the remote store is never asked to delete
//! - queued writes are retried by `flush_outbox`, on demand or on a timer

mod engine;

pub use engine::{cache_key, FlushReport, SyncEngine};
