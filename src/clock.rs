//! Time source abstraction, so expiry and eviction can be driven by tests.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Anything that can tell the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> EpochMillis;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> EpochMillis {
    Utc::now().timestamp_millis()
  }
}

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
  now: Arc<AtomicI64>,
}

impl ManualClock {
  pub fn new(start: EpochMillis) -> Self {
    Self {
      now: Arc::new(AtomicI64::new(start)),
    }
  }

  pub fn set(&self, millis: EpochMillis) {
    self.now.store(millis, Ordering::SeqCst);
  }

  pub fn advance(&self, millis: i64) {
    self.now.fetch_add(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> EpochMillis {
    self.now.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_shared_between_clones() {
    let clock = ManualClock::new(1_000);
    let other = clock.clone();
    clock.advance(500);
    assert_eq!(other.now_millis(), 1_500);
    other.set(42);
    assert_eq!(clock.now_millis(), 42);
  }
}
