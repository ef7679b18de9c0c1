use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A bookable room
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_id: Option<String>,
  #[serde(default)]
  pub number: String,
  #[serde(default)]
  pub category: String,
  #[serde(default)]
  pub status: String, // "available", "occupied" or "maintenance"
  #[serde(default)]
  pub price: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A hotel guest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_id: Option<String>,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A room booking for a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_id: Option<String>,
  #[serde(default)]
  pub client_id: String,
  #[serde(default)]
  pub room_id: String,
  #[serde(default)]
  pub check_in: String, // YYYY-MM-DD
  #[serde(default)]
  pub check_out: String,
  #[serde(default)]
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// An invoice, usually attached to a reservation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reservation_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_id: Option<String>,
  #[serde(default)]
  pub amount: f64,
  #[serde(default)]
  pub status: String, // "paid" or "pending"
  #[serde(default)]
  pub date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
