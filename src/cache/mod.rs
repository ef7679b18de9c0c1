//! In-memory value cache used by every read path.
//!
//! - Per-entry TTL with lazy expiry on read plus a periodic sweep
//! - Frequency-weighted eviction when the cache is full
//! - Key-dictionary compression for large JSON payloads

pub mod compression;
mod entry;
mod value;

pub use value::{CacheStats, ValueCache, DEFAULT_CAPACITY, DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_TTL};
