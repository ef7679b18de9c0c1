//! Typed collection view over a [`KeyValueStore`].
//!
//! Layout in the underlying store:
//! - `<collection>` → JSON array of records, in insertion order
//! - `<collection>_synced` → JSON array of ids confirmed remotely
//! - `<collection>_outbox` → JSON array of [`PendingWrite`]s

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::storage::KeyValueStore;
use super::traits::{PendingWrite, Record};

pub fn synced_key(collection: &str) -> String {
  format!("{}_synced", collection)
}

pub fn outbox_key(collection: &str) -> String {
  format!("{}_outbox", collection)
}

/// The local truth for every collection.
///
/// Each read-modify-write helper runs under one lock, so concurrent callers
/// always see either the state before or after a whole update.
pub struct MirrorStore<S: KeyValueStore> {
  storage: S,
  write_lock: Mutex<()>,
}

impl<S: KeyValueStore> MirrorStore<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage,
      write_lock: Mutex::new(()),
    }
  }

  fn guard(&self) -> Result<MutexGuard<'_, ()>> {
    self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.storage.get(key)? {
      Some(text) => serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse stored {}: {}", key, e)),
      None => Ok(None),
    }
  }

  fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let text =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.storage.set(key, &text)
  }

  // ===== Collections =====

  /// Full list for a collection, empty if nothing was stored yet.
  pub fn read_collection<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
    Ok(self.read_json(collection)?.unwrap_or_default())
  }

  /// Replace a collection's full list.
  pub fn write_collection<T: Serialize>(&self, collection: &str, records: &[T]) -> Result<()> {
    let _guard = self.guard()?;
    self.write_json(collection, records)
  }

  /// Replace the record with the same id, or append it.
  pub fn upsert<T: Record>(&self, record: &T) -> Result<()> {
    let id = record
      .id()
      .ok_or_else(|| eyre!("Cannot store a {} record without an id", T::collection()))?;

    let _guard = self.guard()?;
    let mut records: Vec<T> = self.read_collection(T::collection())?;
    match records.iter_mut().find(|r| r.id() == Some(id)) {
      Some(existing) => *existing = record.clone(),
      None => records.push(record.clone()),
    }
    self.write_json(T::collection(), &records)
  }

  /// Remove a record by id. Returns whether it was present.
  pub fn remove<T: Record>(&self, id: &str) -> Result<bool> {
    let _guard = self.guard()?;
    let mut records: Vec<T> = self.read_collection(T::collection())?;
    let before = records.len();
    records.retain(|r| r.id() != Some(id));
    if records.len() == before {
      return Ok(false);
    }
    self.write_json(T::collection(), &records)?;
    Ok(true)
  }

  /// Merge a remote listing into the stored collection and persist the result.
  ///
  /// Remote records come first; for duplicate ids the first position and the
  /// last data win. Local records whose id the remote does not know follow in
  /// their stored order. The local list is read under the write lock, so a
  /// record upserted while the listing was being fetched is kept.
  pub fn merge_remote<T: Record>(&self, remote: Vec<T>) -> Result<Vec<T>> {
    let collection = T::collection();
    let _guard = self.guard()?;

    let mut merged: Vec<T> = Vec::with_capacity(remote.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in remote {
      let existing = record.id().and_then(|id| positions.get(id)).copied();
      match existing {
        Some(position) => merged[position] = record,
        None => {
          if let Some(id) = record.id() {
            positions.insert(id.to_string(), merged.len());
          }
          merged.push(record);
        }
      }
    }

    let local: Vec<T> = self.read_collection(collection)?;
    merged.extend(
      local
        .into_iter()
        .filter(|r| r.id().map_or(true, |id| !positions.contains_key(id))),
    );

    self.write_json(collection, &merged)?;
    Ok(merged)
  }

  // ===== Synced ids =====

  pub fn synced_ids(&self, collection: &str) -> Result<BTreeSet<String>> {
    Ok(self.read_json(&synced_key(collection))?.unwrap_or_default())
  }

  pub fn mark_synced(&self, collection: &str, id: &str) -> Result<()> {
    let _guard = self.guard()?;
    let mut ids = self.synced_ids(collection)?;
    if ids.insert(id.to_string()) {
      self.write_json(&synced_key(collection), &ids)?;
    }
    Ok(())
  }

  pub fn unmark_synced(&self, collection: &str, id: &str) -> Result<()> {
    let _guard = self.guard()?;
    let mut ids = self.synced_ids(collection)?;
    if ids.remove(id) {
      self.write_json(&synced_key(collection), &ids)?;
    }
    Ok(())
  }

  // ===== Outbox =====

  pub fn outbox(&self, collection: &str) -> Result<Vec<PendingWrite>> {
    Ok(self.read_json(&outbox_key(collection))?.unwrap_or_default())
  }

  /// Queue a write; a newer write for the same id replaces the older one.
  pub fn enqueue(&self, collection: &str, write: PendingWrite) -> Result<()> {
    let _guard = self.guard()?;
    let mut pending = self.outbox(collection)?;
    match pending.iter_mut().find(|p| p.id == write.id) {
      Some(existing) => *existing = write,
      None => pending.push(write),
    }
    self.write_json(&outbox_key(collection), &pending)
  }

  /// Queued write for an id, if any.
  pub fn pending_write(&self, collection: &str, id: &str) -> Result<Option<PendingWrite>> {
    Ok(self.outbox(collection)?.into_iter().find(|p| p.id == id))
  }

  /// Remove a queued write once the remote has accepted it.
  ///
  /// Only removes the entry if it still carries the payload that was sent; a
  /// newer write for the same id stays queued. Returns whether it was removed.
  pub fn dequeue_sent(&self, collection: &str, sent: &PendingWrite) -> Result<bool> {
    let _guard = self.guard()?;
    let mut pending = self.outbox(collection)?;
    let before = pending.len();
    pending.retain(|p| p.id != sent.id || p.record != sent.record);
    if pending.len() == before {
      return Ok(false);
    }
    self.write_json(&outbox_key(collection), &pending)?;
    Ok(true)
  }

  pub fn dequeue(&self, collection: &str, id: &str) -> Result<()> {
    let _guard = self.guard()?;
    let mut pending = self.outbox(collection)?;
    let before = pending.len();
    pending.retain(|p| p.id != id);
    if pending.len() != before {
      self.write_json(&outbox_key(collection), &pending)?;
    }
    Ok(())
  }

  /// Bump the attempt counter of a queued write.
  pub fn record_attempt(&self, collection: &str, id: &str) -> Result<()> {
    let _guard = self.guard()?;
    let mut pending = self.outbox(collection)?;
    if let Some(write) = pending.iter_mut().find(|p| p.id == id) {
      write.attempts = write.attempts.saturating_add(1);
      self.write_json(&outbox_key(collection), &pending)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hotel::Client;
  use crate::store::MemoryKeyValueStore;
  use chrono::Utc;
  use serde_json::json;

  fn client(id: &str, name: &str) -> Client {
    Client {
      id: Some(id.to_string()),
      name: name.to_string(),
      ..Client::default()
    }
  }

  #[test]
  fn test_upsert_replaces_in_place_and_appends() {
    let mirror = MirrorStore::new(MemoryKeyValueStore::new());
    mirror.upsert(&client("a", "Ann")).unwrap();
    mirror.upsert(&client("b", "Bob")).unwrap();
    mirror.upsert(&client("a", "Anna")).unwrap();

    let clients: Vec<Client> = mirror.read_collection("clients").unwrap();
    let names: Vec<&str> = clients.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Anna", "Bob"]);
  }

  #[test]
  fn test_upsert_requires_id() {
    let mirror = MirrorStore::new(MemoryKeyValueStore::new());
    assert!(mirror.upsert(&Client::default()).is_err());
  }

  #[test]
  fn test_remove() {
    let mirror = MirrorStore::new(MemoryKeyValueStore::new());
    mirror.upsert(&client("a", "Ann")).unwrap();
    assert!(mirror.remove::<Client>("a").unwrap());
    assert!(!mirror.remove::<Client>("a").unwrap());
    assert!(mirror.read_collection::<Client>("clients").unwrap().is_empty());
  }

  #[test]
  fn test_synced_ids_use_suffixed_key() {
    let storage = MemoryKeyValueStore::new();
    let mirror = MirrorStore::new(storage);
    mirror.mark_synced("clients", "a").unwrap();
    mirror.mark_synced("clients", "a").unwrap();
    mirror.mark_synced("clients", "b").unwrap();
    mirror.unmark_synced("clients", "a").unwrap();

    let raw = mirror.storage.get("clients_synced").unwrap().unwrap();
    assert_eq!(raw, r#"["b"]"#);
  }

  #[test]
  fn test_outbox_replaces_by_id() {
    let mirror = MirrorStore::new(MemoryKeyValueStore::new());
    let write = |v: i64| PendingWrite {
      id: "a".to_string(),
      record: json!({"id": "a", "v": v}),
      queued_at: Utc::now(),
      attempts: 0,
    };
    mirror.enqueue("clients", write(1)).unwrap();
    mirror.enqueue("clients", write(2)).unwrap();
    mirror.record_attempt("clients", "a").unwrap();

    let pending = mirror.outbox("clients").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record["v"], 2);
    assert_eq!(pending[0].attempts, 1);

    mirror.dequeue("clients", "a").unwrap();
    assert!(mirror.outbox("clients").unwrap().is_empty());
  }

  #[test]
  fn test_dequeue_sent_keeps_newer_write() {
    let mirror = MirrorStore::new(MemoryKeyValueStore::new());
    let write = |name: &str| PendingWrite {
      id: "a".to_string(),
      record: json!({"id": "a", "name": name}),
      queued_at: Utc::now(),
      attempts: 0,
    };
    let sent = write("v1");
    mirror.enqueue("clients", sent.clone()).unwrap();
    mirror.enqueue("clients", write("v2")).unwrap();

    assert!(!mirror.dequeue_sent("clients", &sent).unwrap());
    let queued = mirror.pending_write("clients", "a").unwrap().unwrap();
    assert_eq!(queued.record["name"], "v2");

    assert!(mirror.dequeue_sent("clients", &queued).unwrap());
    assert!(mirror.pending_write("clients", "a").unwrap().is_none());
  }

  #[test]
  fn test_merge_remote_keeps_local_only_records() {
    let mirror = MirrorStore::new(MemoryKeyValueStore::new());
    mirror.upsert(&client("shared", "Local")).unwrap();
    mirror.upsert(&client("mine", "Only here")).unwrap();

    let merged = mirror
      .merge_remote(vec![
        client("shared", "Old remote"),
        client("theirs", "Remote"),
        client("shared", "New remote"),
      ])
      .unwrap();
    let names: Vec<&str> = merged.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["New remote", "Remote", "Only here"]);

    let stored: Vec<Client> = mirror.read_collection("clients").unwrap();
    assert_eq!(stored, merged);
  }

  #[test]
  fn test_corrupt_collection_is_an_error() {
    let storage = MemoryKeyValueStore::new();
    storage.set("rooms", "not json").unwrap();
    let mirror = MirrorStore::new(storage);
    assert!(mirror.read_collection::<serde_json::Value>("rooms").is_err());
  }
}
