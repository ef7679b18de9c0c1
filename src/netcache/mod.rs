//! Offline network cache: classifies intercepted requests and serves them
//! from versioned response partitions or the network.

mod fetch;
mod policy;
mod service;
mod store;
mod types;

pub use fetch::{Fetcher, HttpFetcher, MemoryFetcher};
pub use policy::{RoutePolicy, Strategy};
pub use service::{
  ControlMessage, ControlReply, LifecycleState, NetworkCache, RefreshReport, BACKGROUND_SYNC_TAG,
  DATA_SYNC_TAG,
};
pub use store::{MemoryResponseStore, ResponseStore, SqliteResponseStore};
pub use types::{is_mutating_method, CacheSource, NetRequest, NetResponse, Served};
