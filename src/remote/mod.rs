//! Remote collection API: the document store mirrored by the sync engine.
//!
//! Only insert and full listing are used; the remote side is treated as an
//! append-only log of documents per collection.

mod api_types;
mod client;
mod memory;

pub use api_types::RemoteDocument;
pub use client::HttpRemote;
pub use memory::MemoryRemote;

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;

/// Remote document store, one named collection at a time.
#[async_trait]
pub trait RemoteCollections: Send + Sync {
  /// Append a document and return the identifier the store assigned.
  async fn add_document(&self, collection: &str, record: &Value) -> Result<String>;

  /// Every document currently in the collection.
  async fn list_documents(&self, collection: &str) -> Result<Vec<RemoteDocument>>;
}
