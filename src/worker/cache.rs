//! FIFO result cache for worker computations.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

use super::protocol::OperationKind;

pub const DEFAULT_RESULT_CAPACITY: usize = 1000;

/// Cache key for an operation over a payload.
///
/// SHA-256 of the payload's JSON text. `serde_json` keeps object keys
/// sorted, so equal payloads always produce the same key.
pub fn fingerprint(kind: OperationKind, payload: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload.to_string().as_bytes());
  format!("{}:{}", kind.as_str(), hex::encode(hasher.finalize()))
}

/// Bounded map of computed results; the oldest insert is dropped first.
pub struct ResultCache {
  capacity: usize,
  entries: HashMap<String, Value>,
  order: VecDeque<String>,
}

impl ResultCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      entries: HashMap::new(),
      order: VecDeque::new(),
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.entries.get(key)
  }

  pub fn insert(&mut self, key: String, value: Value) {
    if !self.entries.contains_key(&key) {
      self.order.push_back(key.clone());
    }
    self.entries.insert(key, value);

    while self.order.len() > self.capacity {
      if let Some(oldest) = self.order.pop_front() {
        self.entries.remove(&oldest);
      }
    }
  }

  /// Drop everything, returning how many results were held.
  pub fn clear(&mut self) -> usize {
    let count = self.entries.len();
    self.entries.clear();
    self.order.clear();
    count
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
