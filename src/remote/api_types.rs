//! Serde types matching the remote document API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document as returned by `list_documents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
  /// Identifier assigned by the remote store
  #[serde(rename = "id")]
  pub remote_id: String,
  /// Stored fields, including the record's own `id` when it had one
  #[serde(default)]
  pub data: Map<String, Value>,
}

impl RemoteDocument {
  pub fn new(remote_id: impl Into<String>, data: Map<String, Value>) -> Self {
    Self {
      remote_id: remote_id.into(),
      data,
    }
  }

  /// Flatten into a record-shaped JSON object.
  ///
  /// The record's own `id` wins; the remote id only fills in when the
  /// document has none. The remote id is always kept as `remoteId`.
  pub fn into_record_value(self) -> Value {
    let mut fields = self.data;
    let has_id = fields.get("id").is_some_and(|v| !v.is_null());
    if !has_id {
      fields.insert("id".to_string(), Value::String(self.remote_id.clone()));
    }
    fields.insert("remoteId".to_string(), Value::String(self.remote_id));
    Value::Object(fields)
  }
}

/// Response body of a document insert.
#[derive(Debug, Deserialize)]
pub struct ApiAddResponse {
  pub id: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn fields(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn test_record_id_wins_over_remote_id() {
    let doc = RemoteDocument::new("remote-1", fields(json!({"id": "local-1", "name": "X"})));
    assert_eq!(
      doc.into_record_value(),
      json!({"id": "local-1", "remoteId": "remote-1", "name": "X"})
    );
  }

  #[test]
  fn test_remote_id_fills_missing_id() {
    let doc = RemoteDocument::new("remote-2", fields(json!({"name": "Y", "id": null})));
    assert_eq!(
      doc.into_record_value(),
      json!({"id": "remote-2", "remoteId": "remote-2", "name": "Y"})
    );
  }

  #[test]
  fn test_wire_format() {
    let doc: RemoteDocument =
      serde_json::from_value(json!({"id": "r", "data": {"number": "101"}})).unwrap();
    assert_eq!(doc.remote_id, "r");
    assert_eq!(doc.data["number"], "101");
  }
}
