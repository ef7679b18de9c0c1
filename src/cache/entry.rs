//! A single cache slot and its eviction score.

use crate::clock::EpochMillis;

/// Stored form of a cached value.
#[derive(Debug, Clone)]
pub(crate) enum Payload<V> {
  Plain(V),
  /// Key-abbreviated JSON text, see [`super::compression`].
  Compressed(String),
}

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
  pub data: Payload<V>,
  /// When the value was stored
  pub timestamp: EpochMillis,
  /// Time-to-live in milliseconds
  pub ttl: i64,
  pub access_count: u64,
  pub last_access: EpochMillis,
}

impl<V> CacheEntry<V> {
  pub fn new(data: Payload<V>, now: EpochMillis, ttl: i64) -> Self {
    Self {
      data,
      timestamp: now,
      ttl,
      access_count: 0,
      last_access: now,
    }
  }

  pub fn is_expired(&self, now: EpochMillis) -> bool {
    now - self.timestamp > self.ttl
  }

  pub fn is_compressed(&self) -> bool {
    matches!(self.data, Payload::Compressed(_))
  }

  pub fn touch(&mut self, now: EpochMillis) {
    self.access_count = self.access_count.saturating_add(1);
    self.last_access = now;
  }

  /// `accessCount / (now - lastAccess + 1)`.
  ///
  /// Frequency decayed by idle time, not strict recency: a key read many
  /// times a while ago can still outrank a fresh key that was never read.
  pub fn score(&self, now: EpochMillis) -> f64 {
    let idle = (now - self.last_access).max(0);
    self.access_count as f64 / (idle as f64 + 1.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expiry_boundary_is_inclusive() {
    let entry = CacheEntry::new(Payload::Plain(1), 1_000, 500);
    assert!(!entry.is_expired(1_500));
    assert!(entry.is_expired(1_501));
  }

  #[test]
  fn test_hot_old_entry_outscores_cold_fresh_entry() {
    let mut hot = CacheEntry::new(Payload::Plain(1), 0, 60_000);
    for _ in 0..50 {
      hot.touch(0);
    }
    let cold = CacheEntry::new(Payload::Plain(2), 9_000, 60_000);
    assert!(hot.score(10_000) > cold.score(10_000));
  }
}
