//! Sync engine that keeps the local mirror and the remote store in step.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ValueCache;
use crate::events::{ChangeKind, DataEvent, EventBus};
use crate::remote::RemoteCollections;
use crate::store::{generate_id, KeyValueStore, MirrorStore, PendingWrite, Record};

/// Outcome of an outbox flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  /// Writes the remote accepted
  pub sent: usize,
  /// Writes that failed again and stay queued
  pub failed: usize,
}

/// Local-first persistence over a remote document store.
///
/// Writes land in the [`MirrorStore`] synchronously and are then pushed to
/// the remote in the background. Reads merge the remote listing with records
/// that only exist locally. Remote failures never surface to the caller: the
/// mirror is always the fallback.
///
/// Remote writes go out one at a time, each sending the newest queued write
/// for its id, so the remote receives updates to a record in save order.
pub struct SyncEngine<S: KeyValueStore> {
  mirror: Arc<MirrorStore<S>>,
  remote: Arc<dyn RemoteCollections>,
  cache: Arc<ValueCache<Value>>,
  events: EventBus,
  in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
  push_lock: Arc<AsyncMutex<()>>,
}

impl<S: KeyValueStore + 'static> SyncEngine<S> {
  /// Create an engine over the given storage and remote.
  pub fn new(storage: S, remote: Arc<dyn RemoteCollections>) -> Self {
    Self {
      mirror: Arc::new(MirrorStore::new(storage)),
      remote,
      cache: Arc::new(ValueCache::new()),
      events: EventBus::new(),
      in_flight: Arc::new(Mutex::new(Vec::new())),
      push_lock: Arc::new(AsyncMutex::new(())),
    }
  }

  /// Share a value cache with other readers.
  pub fn with_cache(mut self, cache: Arc<ValueCache<Value>>) -> Self {
    self.cache = cache;
    self
  }

  /// Publish change events on an existing bus.
  pub fn with_events(mut self, events: EventBus) -> Self {
    self.events = events;
    self
  }

  pub fn mirror(&self) -> &MirrorStore<S> {
    &self.mirror
  }

  pub fn events(&self) -> &EventBus {
    &self.events
  }

  /// Save a record locally and start mirroring it to the remote.
  ///
  /// Assigns an id and creation time when missing. Returns as soon as the
  /// local write is done; the remote attempt runs on the tokio runtime if
  /// there is one, otherwise the write just waits in the outbox.
  pub fn save<T: Record>(&self, mut record: T) -> Result<String> {
    let collection = T::collection();

    if record.id().is_none() {
      record.set_id(generate_id());
    }
    if record.created_at().is_none() {
      record.set_created_at(Utc::now().to_rfc3339());
    }
    let id = record
      .id()
      .map(String::from)
      .ok_or_else(|| eyre!("Record has no id after assignment"))?;

    self.mirror.upsert(&record)?;

    let mut payload = serde_json::to_value(&record)
      .map_err(|e| eyre!("Failed to serialize {} record: {}", collection, e))?;
    if let Some(fields) = payload.as_object_mut() {
      fields.remove("remoteId");
    }
    self.mirror.enqueue(
      collection,
      PendingWrite {
        id: id.clone(),
        record: payload,
        queued_at: Utc::now(),
        attempts: 0,
      },
    )?;

    self.cache.invalidate(&cache_key(collection));
    self.events.publish(DataEvent {
      collection: collection.to_string(),
      id: id.clone(),
      kind: ChangeKind::Saved,
    });

    self.spawn_remote_write(collection, id.clone());
    Ok(id)
  }

  fn spawn_remote_write(&self, collection: &'static str, id: String) {
    let handle = match Handle::try_current() {
      Ok(handle) => handle,
      Err(_) => {
        debug!(collection, id = %id, "no async runtime, write stays in outbox");
        return;
      }
    };

    let engine = self.clone();
    let task = handle.spawn(async move {
      engine.push_queued(collection, &id).await;
    });

    if let Ok(mut in_flight) = self.in_flight.lock() {
      in_flight.retain(|t| !t.is_finished());
      in_flight.push(task);
    }
  }

  /// Wait for every background remote write started so far.
  pub async fn settle(&self) {
    loop {
      let tasks: Vec<JoinHandle<()>> = match self.in_flight.lock() {
        Ok(mut in_flight) => in_flight.drain(..).collect(),
        Err(_) => return,
      };
      if tasks.is_empty() {
        return;
      }
      for task in tasks {
        if let Err(e) = task.await {
          warn!(error = %e, "remote write task failed");
        }
      }
    }
  }

  /// Load a collection, merging the remote listing with local-only records.
  ///
  /// Remote data wins for ids present on both sides; local records whose id
  /// the remote does not know are appended. The merged list replaces the
  /// mirror's copy. When the remote cannot be read, the mirror is returned
  /// unchanged.
  pub async fn load<T: Record>(&self) -> Result<Vec<T>> {
    let collection = T::collection();

    let documents = match self.remote.list_documents(collection).await {
      Ok(documents) => documents,
      Err(e) => {
        warn!(collection, error = %e, "remote read failed, serving local mirror");
        return self.mirror.read_collection(collection);
      }
    };

    let mut remote_records: Vec<T> = Vec::with_capacity(documents.len());
    for document in documents {
      let remote_id = document.remote_id.clone();
      match serde_json::from_value(document.into_record_value()) {
        Ok(record) => remote_records.push(record),
        Err(e) => {
          warn!(collection, remote_id = %remote_id, error = %e, "skipping unreadable remote document");
        }
      }
    }

    // Local state is re-read under the mirror lock, after the listing arrived
    let remote_count = remote_records.len();
    let merged = self.mirror.merge_remote(remote_records)?;
    debug!(
      collection,
      remote = remote_count,
      merged = merged.len(),
      "merged collection"
    );
    Ok(merged)
  }

  /// Like [`SyncEngine::load`], but served from the value cache when possible.
  pub async fn load_cached<T: Record>(&self) -> Result<Vec<T>> {
    let key = cache_key(T::collection());

    if let Some(cached) = self.cache.get(&key) {
      match serde_json::from_value(cached) {
        Ok(records) => return Ok(records),
        Err(e) => {
          warn!(key = %key, error = %e, "cached collection has the wrong shape");
          self.cache.invalidate(&key);
        }
      }
    }

    let records = self.load::<T>().await?;
    let value = serde_json::to_value(&records)
      .map_err(|e| eyre!("Failed to serialize {}: {}", T::collection(), e))?;
    self.cache.set(&key, &value)?;
    Ok(records)
  }

  /// Delete a record from the mirror and forget its sync state.
  ///
  /// The remote copy, if any, is left alone: the remote store is append-only
  /// from this engine's point of view, so a record that was already synced
  /// comes back on the next `load`.
  pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
    let collection = T::collection();
    let removed = self.mirror.remove::<T>(id)?;
    self.mirror.unmark_synced(collection, id)?;
    self.mirror.dequeue(collection, id)?;

    self.cache.invalidate(&cache_key(collection));
    self.events.publish(DataEvent {
      collection: collection.to_string(),
      id: id.to_string(),
      kind: ChangeKind::Deleted,
    });
    Ok(removed)
  }

  /// Ids the remote has confirmed for a collection.
  pub fn synced_ids(&self, collection: &str) -> Result<BTreeSet<String>> {
    self.mirror.synced_ids(collection)
  }

  /// Ids of writes still waiting to reach the remote.
  pub fn pending(&self, collection: &str) -> Result<Vec<String>> {
    Ok(
      self
        .mirror
        .outbox(collection)?
        .into_iter()
        .map(|p| p.id)
        .collect(),
    )
  }

  /// Re-send every queued write, including updates to records the remote
  /// already holds.
  pub async fn flush_outbox(&self, collection: &str) -> Result<FlushReport> {
    let mut report = FlushReport::default();

    for id in self.pending(collection)? {
      match self.push_queued(collection, &id).await {
        PushOutcome::Sent => report.sent += 1,
        PushOutcome::Failed => report.failed += 1,
        PushOutcome::NotQueued => {}
      }
    }

    if report.sent + report.failed > 0 {
      info!(
        collection,
        sent = report.sent,
        failed = report.failed,
        "outbox flushed"
      );
    }
    Ok(report)
  }

  /// Send the write currently queued for `id`.
  ///
  /// Holds the push lock across the remote call so writes for the same record
  /// cannot overtake each other. On success only the write that was sent is
  /// dequeued; a newer one saved meanwhile stays queued.
  async fn push_queued(&self, collection: &str, id: &str) -> PushOutcome {
    let _push = self.push_lock.lock().await;

    let write = match self.mirror.pending_write(collection, id) {
      Ok(Some(write)) => write,
      Ok(None) => return PushOutcome::NotQueued,
      Err(e) => {
        warn!(collection, id, error = %e, "failed to read outbox");
        return PushOutcome::Failed;
      }
    };

    match self.remote.add_document(collection, &write.record).await {
      Ok(remote_id) => {
        debug!(collection, id, remote_id = %remote_id, "record mirrored to remote");
        let confirmed = self
          .mirror
          .mark_synced(collection, id)
          .and_then(|_| self.mirror.dequeue_sent(collection, &write));
        if let Err(e) = confirmed {
          warn!(collection, id, error = %e, "failed to record sync confirmation");
        }
        PushOutcome::Sent
      }
      Err(e) => {
        warn!(collection, id, error = %e, "remote write failed, kept in outbox");
        if let Err(e) = self.mirror.record_attempt(collection, id) {
          warn!(collection, id, error = %e, "failed to update outbox");
        }
        PushOutcome::Failed
      }
    }
  }

  /// Flush the outboxes of `collections` every `interval`.
  pub fn spawn_outbox_retry(&self, collections: Vec<String>, interval: Duration) -> JoinHandle<()> {
    let engine = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        for collection in &collections {
          if let Err(e) = engine.flush_outbox(collection).await {
            warn!(collection = %collection, error = %e, "outbox flush failed");
          }
        }
      }
    })
  }
}

impl<S: KeyValueStore> Clone for SyncEngine<S> {
  fn clone(&self) -> Self {
    Self {
      mirror: Arc::clone(&self.mirror),
      remote: Arc::clone(&self.remote),
      cache: Arc::clone(&self.cache),
      events: self.events.clone(),
      in_flight: Arc::clone(&self.in_flight),
      push_lock: Arc::clone(&self.push_lock),
    }
  }
}

/// Value cache key for a whole collection.
pub fn cache_key(collection: &str) -> String {
  format!("collection:{}", collection)
}

enum PushOutcome {
  Sent,
  Failed,
  NotQueued,
}
