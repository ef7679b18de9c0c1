//! Request/response messages exchanged with the compute worker.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the caller asks the worker to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
  ProcessDashboardData,
  CalculateAnalytics,
  OptimizeQueries,
  BatchOperations,
  ClearCache,
}

impl OperationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      OperationKind::ProcessDashboardData => "PROCESS_DASHBOARD_DATA",
      OperationKind::CalculateAnalytics => "CALCULATE_ANALYTICS",
      OperationKind::OptimizeQueries => "OPTIMIZE_QUERIES",
      OperationKind::BatchOperations => "BATCH_OPERATIONS",
      OperationKind::ClearCache => "CLEAR_CACHE",
    }
  }

  /// Kind of the final response for a successful request
  pub fn result_kind(self) -> ResultKind {
    match self {
      OperationKind::ProcessDashboardData => ResultKind::DashboardDataProcessed,
      OperationKind::CalculateAnalytics => ResultKind::AnalyticsCalculated,
      OperationKind::OptimizeQueries => ResultKind::QueriesOptimized,
      OperationKind::BatchOperations => ResultKind::BatchCompleted,
      OperationKind::ClearCache => ResultKind::CacheCleared,
    }
  }
}

/// What the worker answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
  DashboardDataProcessed,
  AnalyticsCalculated,
  QueriesOptimized,
  BatchProgress,
  BatchCompleted,
  CacheCleared,
  Error,
}

impl ResultKind {
  /// Whether this is the last response for its task
  pub fn is_terminal(self) -> bool {
    !matches!(self, ResultKind::BatchProgress)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
  #[serde(rename = "type")]
  pub kind: OperationKind,
  #[serde(default)]
  pub data: Value,
  pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
  #[serde(rename = "type")]
  pub kind: ResultKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  pub task_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from_cache: Option<bool>,
}

impl WorkerResponse {
  pub fn success(kind: ResultKind, task_id: &str, data: Value) -> Self {
    Self {
      kind,
      data: Some(data),
      task_id: task_id.to_string(),
      error: None,
      from_cache: None,
    }
  }

  pub fn cached(kind: ResultKind, task_id: &str, data: Value, from_cache: bool) -> Self {
    Self {
      from_cache: Some(from_cache),
      ..Self::success(kind, task_id, data)
    }
  }

  pub fn progress(task_id: &str, data: Value) -> Self {
    Self::success(ResultKind::BatchProgress, task_id, data)
  }

  pub fn error(task_id: &str, message: impl Into<String>) -> Self {
    Self {
      kind: ResultKind::Error,
      data: None,
      task_id: task_id.to_string(),
      error: Some(message.into()),
      from_cache: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_request_wire_format() {
    let request: WorkerRequest = serde_json::from_value(json!({
      "type": "PROCESS_DASHBOARD_DATA",
      "data": {"rooms": []},
      "taskId": "t1"
    }))
    .unwrap();
    assert_eq!(request.kind, OperationKind::ProcessDashboardData);
    assert_eq!(request.task_id, "t1");
  }

  #[test]
  fn test_error_response_wire_format() {
    let response = WorkerResponse::error("t2", "boom");
    assert_eq!(
      serde_json::to_value(&response).unwrap(),
      json!({"type": "ERROR", "taskId": "t2", "error": "boom"})
    );
  }

  #[test]
  fn test_kind_names_match_serde() {
    let kind = OperationKind::BatchOperations;
    assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
  }
}
