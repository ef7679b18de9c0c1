//! Offline-first data layer for a hotel front desk.
//!
//! - [`cache`]: TTL value cache with score-based eviction and compression
//! - [`store`] and [`sync`]: local mirror of remote collections, outbox retry
//! - [`worker`]: message-driven compute worker for dashboard aggregations
//! - [`netcache`]: versioned offline cache for intercepted HTTP requests

pub mod cache;
pub mod clock;
pub mod config;
pub mod events;
pub mod hotel;
pub mod netcache;
pub mod remote;
pub mod store;
pub mod sync;
pub mod worker;
