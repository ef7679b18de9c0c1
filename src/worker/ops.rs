//! Aggregations performed by the compute worker.
//!
//! Every operation takes the raw JSON payload from the request and returns
//! either a JSON result or an error message for the caller.

use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::hotel::{Bill, Client, Reservation, Room};

pub type OpResult = Result<Value, String>;

fn parse<T: DeserializeOwned>(data: &Value, what: &str) -> Result<T, String> {
  serde_json::from_value(data.clone()).map_err(|e| format!("Invalid {} payload: {}", what, e))
}

fn round1(x: f64) -> f64 {
  (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
  (x * 100.0).round() / 100.0
}

// ===== Dashboard =====

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DashboardInput {
  rooms: Vec<Room>,
  clients: Vec<Client>,
  reservations: Vec<Reservation>,
  bills: Vec<Bill>,
  today: Option<String>,
}

/// Headline numbers for the front desk dashboard.
pub fn process_dashboard(data: &Value) -> OpResult {
  let input: DashboardInput = parse(data, "dashboard")?;
  let today = input
    .today
    .unwrap_or_else(|| Utc::now().date_naive().format("%Y-%m-%d").to_string());

  let count_rooms = |status: &str| input.rooms.iter().filter(|r| r.status == status).count();
  let occupied = count_rooms("occupied");
  let occupancy_rate = if input.rooms.is_empty() {
    0.0
  } else {
    round1(occupied as f64 * 100.0 / input.rooms.len() as f64)
  };

  let live: Vec<&Reservation> = input
    .reservations
    .iter()
    .filter(|r| r.status != "cancelled")
    .collect();
  let active = live
    .iter()
    .filter(|r| r.check_in.as_str() <= today.as_str() && today.as_str() < r.check_out.as_str())
    .count();
  let check_ins = live.iter().filter(|r| r.check_in == today).count();
  let check_outs = live.iter().filter(|r| r.check_out == today).count();

  let (paid, pending): (Vec<&Bill>, Vec<&Bill>) =
    input.bills.iter().partition(|b| b.status == "paid");

  Ok(json!({
    "date": today,
    "totals": {
      "rooms": input.rooms.len(),
      "clients": input.clients.len(),
      "reservations": input.reservations.len(),
      "bills": input.bills.len(),
    },
    "rooms": {
      "occupied": occupied,
      "available": count_rooms("available"),
      "maintenance": count_rooms("maintenance"),
      "occupancyRate": occupancy_rate,
    },
    "reservations": {
      "active": active,
      "checkInsToday": check_ins,
      "checkOutsToday": check_outs,
    },
    "revenue": {
      "paid": round2(paid.iter().map(|b| b.amount).sum()),
      "pending": round2(pending.iter().map(|b| b.amount).sum()),
    },
  }))
}

// ===== Analytics =====

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyticsInput {
  reservations: Vec<Reservation>,
  bills: Vec<Bill>,
}

const TOP_CLIENTS: usize = 5;

/// Revenue and occupancy rollups.
pub fn calculate_analytics(data: &Value) -> OpResult {
  let input: AnalyticsInput = parse(data, "analytics")?;

  let mut revenue_by_month: BTreeMap<String, f64> = BTreeMap::new();
  for bill in input.bills.iter().filter(|b| b.status == "paid") {
    if let Some(month) = bill.date.get(..7) {
      *revenue_by_month.entry(month.to_string()).or_default() += bill.amount;
    }
  }
  for amount in revenue_by_month.values_mut() {
    *amount = round2(*amount);
  }

  let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
  for reservation in &input.reservations {
    *by_status.entry(reservation.status.clone()).or_default() += 1;
  }

  let average_bill = if input.bills.is_empty() {
    0.0
  } else {
    round2(input.bills.iter().map(|b| b.amount).sum::<f64>() / input.bills.len() as f64)
  };

  let nights: Vec<i64> = input
    .reservations
    .iter()
    .filter_map(|r| {
      let check_in = NaiveDate::parse_from_str(&r.check_in, "%Y-%m-%d").ok()?;
      let check_out = NaiveDate::parse_from_str(&r.check_out, "%Y-%m-%d").ok()?;
      Some((check_out - check_in).num_days())
    })
    .filter(|n| *n > 0)
    .collect();
  let average_stay = if nights.is_empty() {
    0.0
  } else {
    round1(nights.iter().sum::<i64>() as f64 / nights.len() as f64)
  };

  let mut per_client: HashMap<&str, f64> = HashMap::new();
  for bill in &input.bills {
    if let Some(client) = bill.client_id.as_deref() {
      *per_client.entry(client).or_default() += bill.amount;
    }
  }
  let mut top: Vec<(&str, f64)> = per_client.into_iter().collect();
  top.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));
  let top_clients: Vec<Value> = top
    .into_iter()
    .take(TOP_CLIENTS)
    .map(|(client, amount)| json!({"clientId": client, "amount": round2(amount)}))
    .collect();

  Ok(json!({
    "revenueByMonth": revenue_by_month,
    "reservationsByStatus": by_status,
    "averageBill": average_bill,
    "averageStayNights": average_stay,
    "topClients": top_clients,
  }))
}

// ===== Queries =====

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum SortOrder {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QueryInput {
  items: Vec<Value>,
  filters: Map<String, Value>,
  sort_by: Option<String>,
  sort_order: SortOrder,
  limit: Option<usize>,
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (Some(Value::Number(x)), Some(Value::Number(y))) => {
      let x = x.as_f64().unwrap_or(0.0);
      let y = y.as_f64().unwrap_or(0.0);
      x.total_cmp(&y)
    }
    (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
    (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
  }
}

/// Filter, sort and truncate a list of records in one pass.
pub fn optimize_queries(data: &Value) -> OpResult {
  let input: QueryInput = parse(data, "query")?;
  let total = input.items.len();

  let mut items: Vec<Value> = input
    .items
    .into_iter()
    .filter(|item| {
      input
        .filters
        .iter()
        .all(|(field, expected)| item.get(field) == Some(expected))
    })
    .collect();
  let matched = items.len();

  if let Some(field) = &input.sort_by {
    // Stable sort, so equal keys keep their input order
    items.sort_by(|a, b| {
      let ordering = compare_values(a.get(field), b.get(field));
      match input.sort_order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
      }
    });
  }
  if let Some(limit) = input.limit {
    items.truncate(limit);
  }

  Ok(json!({
    "total": total,
    "matched": matched,
    "returned": items.len(),
    "items": items,
  }))
}

// ===== Batch =====

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperation {
  /// Flag each item with `valid`: it has a non-empty string id
  Validate,
  /// Trim top-level strings and lowercase `email`
  Normalize,
  /// Add a `processedAt` timestamp
  Stamp,
}

#[derive(Debug, Deserialize)]
struct BatchInput {
  #[serde(default)]
  items: Vec<Value>,
  operation: BatchOperation,
}

fn apply(operation: BatchOperation, index: usize, item: &Value, now: &str) -> OpResult {
  let mut fields = match item {
    Value::Object(map) => map.clone(),
    _ => return Err(format!("Batch item {} is not an object", index)),
  };

  match operation {
    BatchOperation::Validate => {
      let valid = fields
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
      fields.insert("valid".to_string(), Value::Bool(valid));
    }
    BatchOperation::Normalize => {
      for (key, value) in fields.iter_mut() {
        if let Value::String(s) = value {
          let trimmed = s.trim();
          *s = if key == "email" {
            trimmed.to_lowercase()
          } else {
            trimmed.to_string()
          };
        }
      }
    }
    BatchOperation::Stamp => {
      fields.insert("processedAt".to_string(), Value::String(now.to_string()));
    }
  }
  Ok(Value::Object(fields))
}

/// Transform `items` chunk by chunk, reporting progress after each chunk.
///
/// The first failing item aborts the batch; no partial result is returned.
pub fn run_batch(data: &Value, chunk_size: usize, progress: &mut dyn FnMut(Value)) -> OpResult {
  let input: BatchInput = parse(data, "batch")?;
  let total = input.items.len();
  let now = Utc::now().to_rfc3339();
  let mut results = Vec::with_capacity(total);

  for (chunk_index, chunk) in input.items.chunks(chunk_size.max(1)).enumerate() {
    let offset = chunk_index * chunk_size.max(1);
    for (i, item) in chunk.iter().enumerate() {
      results.push(apply(input.operation, offset + i, item, &now)?);
    }
    let processed = results.len();
    progress(json!({
      "progress": (processed * 100) / total,
      "processed": processed,
      "total": total,
    }));
  }

  Ok(json!({ "results": results, "total": total }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dashboard_counts() {
    let data = json!({
      "today": "2024-06-10",
      "rooms": [
        {"id": "1", "status": "occupied"},
        {"id": "2", "status": "available"},
        {"id": "3", "status": "available"},
        {"id": "4", "status": "maintenance"}
      ],
      "clients": [{"id": "c1", "name": "A"}],
      "reservations": [
        {"id": "r1", "checkIn": "2024-06-10", "checkOut": "2024-06-12", "status": "confirmed"},
        {"id": "r2", "checkIn": "2024-06-08", "checkOut": "2024-06-10", "status": "checked-in"},
        {"id": "r3", "checkIn": "2024-06-09", "checkOut": "2024-06-11", "status": "cancelled"}
      ],
      "bills": [
        {"id": "b1", "amount": 100.0, "status": "paid"},
        {"id": "b2", "amount": 50.5, "status": "pending"}
      ]
    });
    let result = process_dashboard(&data).unwrap();
    assert_eq!(result["rooms"]["occupied"], 1);
    assert_eq!(result["rooms"]["available"], 2);
    assert_eq!(result["rooms"]["occupancyRate"], 25.0);
    assert_eq!(result["reservations"]["active"], 1);
    assert_eq!(result["reservations"]["checkInsToday"], 1);
    assert_eq!(result["reservations"]["checkOutsToday"], 1);
    assert_eq!(result["revenue"]["paid"], 100.0);
    assert_eq!(result["revenue"]["pending"], 50.5);
    assert_eq!(result["totals"]["clients"], 1);
  }

  #[test]
  fn test_dashboard_empty_payload() {
    let result = process_dashboard(&json!({"today": "2024-01-01"})).unwrap();
    assert_eq!(result["rooms"]["occupancyRate"], 0.0);
    assert_eq!(result["totals"]["rooms"], 0);
  }

  #[test]
  fn test_dashboard_rejects_wrong_shape() {
    let err = process_dashboard(&json!({"rooms": "nope"})).unwrap_err();
    assert!(err.starts_with("Invalid dashboard payload"));
  }

  #[test]
  fn test_analytics() {
    let data = json!({
      "reservations": [
        {"checkIn": "2024-01-01", "checkOut": "2024-01-04", "status": "completed"},
        {"checkIn": "2024-02-01", "checkOut": "2024-02-02", "status": "completed"},
        {"checkIn": "bad", "checkOut": "2024-02-02", "status": "cancelled"}
      ],
      "bills": [
        {"clientId": "c1", "amount": 300.0, "status": "paid", "date": "2024-01-04"},
        {"clientId": "c2", "amount": 100.0, "status": "paid", "date": "2024-02-02"},
        {"clientId": "c1", "amount": 50.0, "status": "pending", "date": "2024-02-10"}
      ]
    });
    let result = calculate_analytics(&data).unwrap();
    assert_eq!(result["revenueByMonth"], json!({"2024-01": 300.0, "2024-02": 100.0}));
    assert_eq!(
      result["reservationsByStatus"],
      json!({"cancelled": 1, "completed": 2})
    );
    assert_eq!(result["averageBill"], 150.0);
    assert_eq!(result["averageStayNights"], 2.0);
    assert_eq!(result["topClients"][0], json!({"clientId": "c1", "amount": 350.0}));
  }

  #[test]
  fn test_optimize_queries() {
    let data = json!({
      "items": [
        {"id": "1", "status": "available", "price": 120},
        {"id": "2", "status": "occupied", "price": 90},
        {"id": "3", "status": "available", "price": 80},
        {"id": "4", "status": "available", "price": 200}
      ],
      "filters": {"status": "available"},
      "sortBy": "price",
      "sortOrder": "desc",
      "limit": 2
    });
    let result = optimize_queries(&data).unwrap();
    assert_eq!(result["total"], 4);
    assert_eq!(result["matched"], 3);
    assert_eq!(result["returned"], 2);
    let ids: Vec<&str> = result["items"]
      .as_array()
      .unwrap()
      .iter()
      .map(|i| i["id"].as_str().unwrap())
      .collect();
    assert_eq!(ids, vec!["4", "1"]);
  }

  #[test]
  fn test_batch_reports_progress_per_chunk() {
    let items: Vec<Value> = (0..120).map(|i| json!({"id": format!("{}", i)})).collect();
    let mut updates = Vec::new();
    let result = run_batch(
      &json!({"items": items, "operation": "validate"}),
      50,
      &mut |p: Value| updates.push(p),
    )
    .unwrap();

    let percents: Vec<u64> = updates
      .iter()
      .map(|u| u["progress"].as_u64().unwrap())
      .collect();
    assert_eq!(percents, vec![41, 83, 100]);
    assert_eq!(result["total"], 120);
    assert_eq!(result["results"][119]["valid"], true);
  }

  #[test]
  fn test_batch_normalize() {
    let result = run_batch(
      &json!({"items": [{"name": "  Ana ", "email": " ANA@X.COM "}], "operation": "normalize"}),
      50,
      &mut |_: Value| {},
    )
    .unwrap();
    assert_eq!(
      result["results"][0],
      json!({"name": "Ana", "email": "ana@x.com"})
    );
  }

  #[test]
  fn test_batch_aborts_on_bad_item() {
    let mut updates = 0;
    let items: Vec<Value> = (0..60)
      .map(|i| if i == 55 { json!(5) } else { json!({"id": "x"}) })
      .collect();
    let err = run_batch(
      &json!({"items": items, "operation": "stamp"}),
      50,
      &mut |_: Value| updates += 1,
    )
    .unwrap_err();
    assert_eq!(err, "Batch item 55 is not an object");
    assert_eq!(updates, 1);
  }

  #[test]
  fn test_empty_batch() {
    let mut updates = 0;
    let result = run_batch(
      &json!({"items": [], "operation": "stamp"}),
      50,
      &mut |_: Value| updates += 1,
    )
    .unwrap();
    assert_eq!(updates, 0);
    assert_eq!(result["results"], json!([]));
  }
}
