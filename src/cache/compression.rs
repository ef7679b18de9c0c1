//! Key-dictionary compression for large cached payloads.
//!
//! Object keys found in [`DICTIONARY`] are renamed to a one-letter
//! abbreviation at every depth of the JSON tree. String values are never
//! rewritten, so a client named `"id": 7` survives intact.
//!
//! A literal key that collides with an abbreviation, or that already starts
//! with [`ESCAPE`], gets one extra `~` in front. That keeps the mapping
//! injective and therefore exactly reversible.

use serde_json::{Map, Value};

/// Full key name → abbreviation.
pub const DICTIONARY: &[(&str, &str)] = &[
  ("id", "i"),
  ("name", "n"),
  ("status", "s"),
  ("date", "d"),
  ("amount", "a"),
  ("type", "t"),
  ("createdAt", "c"),
];

const ESCAPE: char = '~';

/// Compress a JSON value into its abbreviated string form.
pub fn compress(value: &Value) -> Result<String, serde_json::Error> {
  serde_json::to_string(&rename_keys(value, &encode_key))
}

/// Inverse of [`compress`].
pub fn decompress(text: &str) -> Result<Value, serde_json::Error> {
  let value: Value = serde_json::from_str(text)?;
  Ok(rename_keys(&value, &decode_key))
}

fn rename_keys(value: &Value, rename: &dyn Fn(&str) -> String) -> Value {
  match value {
    Value::Object(map) => {
      let renamed: Map<String, Value> = map
        .iter()
        .map(|(k, v)| (rename(k), rename_keys(v, rename)))
        .collect();
      Value::Object(renamed)
    }
    Value::Array(items) => Value::Array(items.iter().map(|v| rename_keys(v, rename)).collect()),
    other => other.clone(),
  }
}

fn encode_key(key: &str) -> String {
  if let Some((_, short)) = DICTIONARY.iter().find(|(long, _)| *long == key) {
    return (*short).to_string();
  }
  if key.starts_with(ESCAPE) || DICTIONARY.iter().any(|(_, short)| *short == key) {
    return format!("{}{}", ESCAPE, key);
  }
  key.to_string()
}

fn decode_key(key: &str) -> String {
  if let Some(rest) = key.strip_prefix(ESCAPE) {
    return rest.to_string();
  }
  if let Some((long, _)) = DICTIONARY.iter().find(|(_, short)| *short == key) {
    return (*long).to_string();
  }
  key.to_string()
}
