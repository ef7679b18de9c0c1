use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use super::api_types::RemoteDocument;
use super::RemoteCollections;

/// In-process stand-in for the remote document store.
///
/// `set_offline(true)` makes every call fail, which is how outages are simulated.
#[derive(Default)]
pub struct MemoryRemote {
  collections: Mutex<HashMap<String, Vec<RemoteDocument>>>,
  offline: AtomicBool,
  next_id: AtomicU64,
  add_calls: AtomicU64,
}

impl MemoryRemote {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of `add_document` calls, successful or not.
  pub fn add_calls(&self) -> u64 {
    self.add_calls.load(Ordering::SeqCst)
  }

  /// Snapshot of a collection.
  pub fn documents(&self, collection: &str) -> Vec<RemoteDocument> {
    self
      .collections
      .lock()
      .map(|c| c.get(collection).cloned().unwrap_or_default())
      .unwrap_or_default()
  }

  /// Seed a document directly, bypassing the offline switch.
  pub fn insert(&self, collection: &str, document: RemoteDocument) {
    if let Ok(mut collections) = self.collections.lock() {
      collections
        .entry(collection.to_string())
        .or_default()
        .push(document);
    }
  }

  fn check_online(&self) -> Result<()> {
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Remote store unreachable"));
    }
    Ok(())
  }
}

#[async_trait]
impl RemoteCollections for MemoryRemote {
  async fn add_document(&self, collection: &str, record: &Value) -> Result<String> {
    self.add_calls.fetch_add(1, Ordering::SeqCst);
    self.check_online()?;

    let data = match record {
      Value::Object(map) => map.clone(),
      _ => return Err(eyre!("Documents must be JSON objects")),
    };
    let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

    let mut collections = self
      .collections
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    collections
      .entry(collection.to_string())
      .or_default()
      .push(RemoteDocument::new(id.clone(), data));

    Ok(id)
  }

  async fn list_documents(&self, collection: &str) -> Result<Vec<RemoteDocument>> {
    self.check_online()?;
    Ok(self.documents(collection))
  }
}
