//! Core traits and types for persisted collection records.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Trait for entities that live in a named collection.
///
/// The sync and cache layers only ever look at the `id`; everything else
/// about a record is opaque to them.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Collection name used as the storage key (e.g., "rooms", "clients")
  fn collection() -> &'static str;

  /// Unique identifier, `None` until the record is first saved.
  fn id(&self) -> Option<&str>;

  fn set_id(&mut self, id: String);

  /// Creation timestamp (RFC 3339).
  fn created_at(&self) -> Option<&str>;

  fn set_created_at(&mut self, at: String);
}

/// A record write that has been applied locally but not yet confirmed remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
  pub id: String,
  pub record: Value,
  pub queued_at: DateTime<Utc>,
  #[serde(default)]
  pub attempts: u32,
}

/// Generate a record id: base-36 epoch millis followed by 9 random characters.
pub fn generate_id() -> String {
  let millis = Utc::now().timestamp_millis().max(0) as u64;
  let suffix: String = rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .filter(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    .take(9)
    .map(char::from)
    .collect();
  format!("{}{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
  const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
  if n == 0 {
    return "0".to_string();
  }
  let mut out = Vec::new();
  while n > 0 {
    out.push(DIGITS[(n % 36) as usize]);
    n /= 36;
  }
  out.reverse();
  String::from_utf8(out).unwrap_or_default()
}
