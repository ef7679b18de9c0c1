//! In-memory TTL cache with frequency-weighted eviction.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::compression;
use super::entry::{CacheEntry, Payload};
use crate::clock::{Clock, EpochMillis, SystemClock};
use crate::config::CacheConfig;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1000;

/// Counters describing cache behaviour since construction or the last `clear`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub expirations: u64,
}

struct State<V> {
  entries: HashMap<String, CacheEntry<V>>,
  stats: CacheStats,
}

/// Key → value cache with per-entry TTL.
///
/// When full, the entry with the lowest `accessCount / (idle + 1)` score is
/// evicted (ties go to the least recently used, then the oldest). Values whose
/// JSON form exceeds the compression threshold are stored key-abbreviated.
///
/// Every operation holds the internal lock for its whole duration, so a
/// reader never observes a half-applied `set` or eviction.
pub struct ValueCache<V> {
  state: Mutex<State<V>>,
  capacity: usize,
  default_ttl: Duration,
  compression_threshold: usize,
  clock: Arc<dyn Clock>,
}

impl<V> ValueCache<V>
where
  V: Clone + Serialize + DeserializeOwned,
{
  /// Create a cache with default capacity, TTL and compression threshold.
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State {
        entries: HashMap::new(),
        stats: CacheStats::default(),
      }),
      capacity: DEFAULT_CAPACITY,
      default_ttl: DEFAULT_TTL,
      compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
      clock: Arc::new(SystemClock),
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new()
      .with_capacity(config.capacity)
      .with_default_ttl(Duration::from_secs(config.default_ttl_secs))
      .with_compression_threshold(config.compression_threshold)
  }

  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity.max(1);
    self
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
    self.compression_threshold = bytes;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  fn lock(&self) -> MutexGuard<'_, State<V>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store a value with the default TTL.
  pub fn set(&self, key: &str, value: &V) -> Result<()> {
    self.set_with_ttl(key, value, self.default_ttl)
  }

  /// Store a value with an explicit TTL.
  pub fn set_with_ttl(&self, key: &str, value: &V, ttl: Duration) -> Result<()> {
    let json =
      serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize cache value: {}", e))?;
    let size = serde_json::to_string(&json)
      .map_err(|e| eyre!("Failed to serialize cache value: {}", e))?
      .len();

    let data = if size > self.compression_threshold {
      let text = compression::compress(&json)
        .map_err(|e| eyre!("Failed to compress cache value: {}", e))?;
      debug!(key, size, compressed = text.len(), "compressed cache entry");
      Payload::Compressed(text)
    } else {
      Payload::Plain(value.clone())
    };

    let now = self.clock.now_millis();
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

    let mut state = self.lock();
    if !state.entries.contains_key(key) && state.entries.len() >= self.capacity {
      evict_one(&mut state, now);
    }
    state
      .entries
      .insert(key.to_string(), CacheEntry::new(data, now, ttl_ms));
    Ok(())
  }

  /// Look up a value. Expired or unreadable entries are removed and reported as a miss.
  pub fn get(&self, key: &str) -> Option<V> {
    let now = self.clock.now_millis();
    let mut state = self.lock();

    let expired = match state.entries.get(key) {
      Some(entry) => entry.is_expired(now),
      None => {
        state.stats.misses += 1;
        return None;
      }
    };
    if expired {
      state.entries.remove(key);
      state.stats.expirations += 1;
      state.stats.misses += 1;
      return None;
    }

    let entry = state.entries.get_mut(key)?;
    entry.touch(now);
    let decoded = match &entry.data {
      Payload::Plain(value) => Ok(value.clone()),
      Payload::Compressed(text) => decode(text),
    };

    match decoded {
      Ok(value) => {
        state.stats.hits += 1;
        Some(value)
      }
      Err(e) => {
        warn!(key, error = %e, "dropping malformed cache entry");
        state.entries.remove(key);
        state.stats.misses += 1;
        None
      }
    }
  }

  /// True if a live entry exists. Does not count as an access.
  pub fn contains(&self, key: &str) -> bool {
    let now = self.clock.now_millis();
    self
      .lock()
      .entries
      .get(key)
      .is_some_and(|e| !e.is_expired(now))
  }

  /// Whether the stored form of `key` is compressed.
  pub fn is_compressed(&self, key: &str) -> bool {
    self.lock().entries.get(key).is_some_and(|e| e.is_compressed())
  }

  pub fn invalidate(&self, key: &str) {
    self.lock().entries.remove(key);
  }

  pub fn clear(&self) {
    let mut state = self.lock();
    state.entries.clear();
    state.stats = CacheStats::default();
  }

  /// Remove every expired entry. Returns how many were dropped.
  pub fn cleanup(&self) -> usize {
    let now = self.clock.now_millis();
    let mut state = self.lock();
    let before = state.entries.len();
    state.entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before - state.entries.len();
    state.stats.expirations += removed as u64;
    if removed > 0 {
      debug!(removed, "cache cleanup");
    }
    removed
  }

  /// Number of stored entries, including expired ones not yet swept.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    self.lock().stats
  }
}

impl<V> ValueCache<V>
where
  V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
  /// Run [`ValueCache::cleanup`] every `interval` on the tokio runtime.
  pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
    let cache = Arc::clone(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        cache.cleanup();
      }
    })
  }
}

impl<V> Default for ValueCache<V>
where
  V: Clone + Serialize + DeserializeOwned,
{
  fn default() -> Self {
    Self::new()
  }
}

fn decode<V: DeserializeOwned>(text: &str) -> Result<V> {
  let json = compression::decompress(text)
    .map_err(|e| eyre!("Failed to decompress cache value: {}", e))?;
  serde_json::from_value(json).map_err(|e| eyre!("Failed to deserialize cache value: {}", e))
}

fn evict_one<V>(state: &mut State<V>, now: EpochMillis) {
  let victim = state
    .entries
    .iter()
    .min_by(|(ka, a), (kb, b)| {
      a.score(now)
        .total_cmp(&b.score(now))
        .then(a.last_access.cmp(&b.last_access))
        .then(a.timestamp.cmp(&b.timestamp))
        .then(ka.cmp(kb))
    })
    .map(|(key, _)| key.clone());

  if let Some(key) = victim {
    debug!(key = %key, "evicting cache entry");
    state.entries.remove(&key);
    state.stats.evictions += 1;
  }
}
