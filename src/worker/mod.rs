//! Background compute worker.
//!
//! Runs heavy aggregations on its own blocking thread and talks to callers
//! only through messages. Requests are handled strictly one after another;
//! a failing (or panicking) request becomes an `ERROR` response and never
//! takes the worker down.

mod cache;
mod ops;
mod protocol;

pub use cache::{fingerprint, ResultCache, DEFAULT_RESULT_CAPACITY};
pub use ops::BatchOperation;
pub use protocol::{OperationKind, ResultKind, WorkerRequest, WorkerResponse};

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::WorkerConfig;

pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// The worker's private state: its result cache and batch settings.
pub struct ComputeWorker {
  cache: ResultCache,
  chunk_size: usize,
}

impl ComputeWorker {
  pub fn new(config: &WorkerConfig) -> Self {
    Self {
      cache: ResultCache::new(config.cache_capacity),
      chunk_size: config.chunk_size.max(1),
    }
  }

  /// Number of cached results.
  pub fn cached_results(&self) -> usize {
    self.cache.len()
  }

  /// Handle one request, emitting every response it produces.
  pub fn handle(&mut self, request: &WorkerRequest, emit: &mut dyn FnMut(WorkerResponse)) {
    let task_id = request.task_id.clone();
    let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(request, &mut *emit)));

    let failure = match outcome {
      Ok(Ok(())) => return,
      Ok(Err(message)) => message,
      Err(panic) => panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Worker task panicked".to_string()),
    };
    warn!(task_id = %task_id, kind = request.kind.as_str(), error = %failure, "worker task failed");
    emit(WorkerResponse::error(&task_id, failure));
  }

  fn dispatch(
    &mut self,
    request: &WorkerRequest,
    emit: &mut dyn FnMut(WorkerResponse),
  ) -> Result<(), String> {
    let task_id = request.task_id.as_str();
    let kind = request.kind;

    match kind {
      OperationKind::ClearCache => {
        let cleared = self.cache.clear();
        emit(WorkerResponse::success(
          kind.result_kind(),
          task_id,
          json!({ "cleared": cleared }),
        ));
      }
      OperationKind::BatchOperations => {
        let result = ops::run_batch(&request.data, self.chunk_size, &mut |progress: Value| {
          emit(WorkerResponse::progress(task_id, progress))
        })?;
        emit(WorkerResponse::success(kind.result_kind(), task_id, result));
      }
      OperationKind::ProcessDashboardData
      | OperationKind::CalculateAnalytics
      | OperationKind::OptimizeQueries => {
        let key = fingerprint(kind, &request.data);
        if let Some(hit) = self.cache.get(&key) {
          debug!(task_id, kind = kind.as_str(), "worker cache hit");
          emit(WorkerResponse::cached(
            kind.result_kind(),
            task_id,
            hit.clone(),
            true,
          ));
          return Ok(());
        }

        let result = compute(kind, &request.data)?;
        self.cache.insert(key, result.clone());
        emit(WorkerResponse::cached(
          kind.result_kind(),
          task_id,
          result,
          false,
        ));
      }
    }
    Ok(())
  }

  /// Move the worker onto its own OS thread.
  ///
  /// Returns a handle for submitting requests and reading responses.
  /// The thread exits once every handle has been dropped.
  pub fn spawn(mut self) -> Result<WorkerHandle> {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
    let (response_tx, response_rx) = mpsc::unbounded_channel::<WorkerResponse>();

    thread::Builder::new()
      .name("compute-worker".to_string())
      .spawn(move || {
        while let Some(request) = request_rx.blocking_recv() {
          self.handle(&request, &mut |response: WorkerResponse| {
            // The caller may have stopped listening; keep working regardless
            let _ = response_tx.send(response);
          });
        }
        debug!("compute worker stopped");
      })
      .map_err(|e| eyre!("Failed to start compute worker: {}", e))?;

    Ok(WorkerHandle {
      tx: request_tx,
      rx: response_rx,
      next_task: AtomicU64::new(1),
    })
  }
}

fn compute(kind: OperationKind, data: &Value) -> Result<Value, String> {
  match kind {
    OperationKind::ProcessDashboardData => ops::process_dashboard(data),
    OperationKind::CalculateAnalytics => ops::calculate_analytics(data),
    OperationKind::OptimizeQueries => ops::optimize_queries(data),
    other => Err(format!("{} is not a cacheable computation", other.as_str())),
  }
}

/// Caller side of a spawned [`ComputeWorker`].
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerRequest>,
  rx: mpsc::UnboundedReceiver<WorkerResponse>,
  next_task: AtomicU64,
}

impl WorkerHandle {
  /// Queue a request with a fresh task id and return that id.
  pub fn submit(&self, kind: OperationKind, data: Value) -> Result<String> {
    let task_id = format!("task-{}", self.next_task.fetch_add(1, Ordering::SeqCst));
    self.send(WorkerRequest {
      kind,
      data,
      task_id: task_id.clone(),
    })?;
    Ok(task_id)
  }

  /// Queue a fully formed request.
  pub fn send(&self, request: WorkerRequest) -> Result<()> {
    self
      .tx
      .send(request)
      .map_err(|_| eyre!("Compute worker has stopped"))
  }

  /// Next response for any task, `None` once the worker is gone.
  pub async fn recv(&mut self) -> Option<WorkerResponse> {
    self.rx.recv().await
  }

  /// Submit a request and collect its responses up to the final one.
  ///
  /// Responses for other tasks that arrive in between are dropped, so use
  /// `submit`/`recv` when several requests are outstanding.
  pub async fn call(&mut self, kind: OperationKind, data: Value) -> Result<Vec<WorkerResponse>> {
    let task_id = self.submit(kind, data)?;
    let mut responses = Vec::new();

    while let Some(response) = self.rx.recv().await {
      if response.task_id != task_id {
        continue;
      }
      let done = response.kind.is_terminal();
      responses.push(response);
      if done {
        return Ok(responses);
      }
    }
    Err(eyre!("Compute worker stopped before finishing {}", task_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn worker() -> ComputeWorker {
    ComputeWorker::new(&WorkerConfig::default())
  }

  fn run(worker: &mut ComputeWorker, kind: OperationKind, data: Value) -> Vec<WorkerResponse> {
    let mut out = Vec::new();
    let request = WorkerRequest {
      kind,
      data,
      task_id: "t".to_string(),
    };
    worker.handle(&request, &mut |r: WorkerResponse| out.push(r));
    out
  }

  #[test]
  fn test_repeat_request_is_served_from_cache() {
    let mut worker = worker();
    let data = json!({"today": "2024-01-01", "rooms": [{"status": "occupied"}]});

    let first = run(&mut worker, OperationKind::ProcessDashboardData, data.clone());
    let second = run(&mut worker, OperationKind::ProcessDashboardData, data);

    assert_eq!(first[0].from_cache, Some(false));
    assert_eq!(second[0].from_cache, Some(true));
    assert_eq!(first[0].data, second[0].data);
    assert_eq!(second[0].kind, ResultKind::DashboardDataProcessed);
  }

  #[test]
  fn test_clear_cache() {
    let mut worker = worker();
    run(
      &mut worker,
      OperationKind::OptimizeQueries,
      json!({"items": []}),
    );
    assert_eq!(worker.cached_results(), 1);

    let out = run(&mut worker, OperationKind::ClearCache, Value::Null);
    assert_eq!(out[0].kind, ResultKind::CacheCleared);
    assert_eq!(out[0].data, Some(json!({"cleared": 1})));
    assert_eq!(worker.cached_results(), 0);
  }

  #[test]
  fn test_bad_payload_yields_error_response() {
    let mut worker = worker();
    let out = run(
      &mut worker,
      OperationKind::CalculateAnalytics,
      json!({"bills": 3}),
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, ResultKind::Error);
    assert_eq!(out[0].task_id, "t");
    assert!(out[0].error.as_deref().unwrap().contains("analytics"));
    assert_eq!(worker.cached_results(), 0);

    // The worker keeps serving afterwards
    let out = run(
      &mut worker,
      OperationKind::OptimizeQueries,
      json!({"items": []}),
    );
    assert_eq!(out[0].kind, ResultKind::QueriesOptimized);
  }

  #[test]
  fn test_batch_progress_then_completion() {
    let mut worker = worker();
    let items: Vec<Value> = (0..75).map(|i| json!({"id": i.to_string()})).collect();
    let out = run(
      &mut worker,
      OperationKind::BatchOperations,
      json!({"items": items, "operation": "stamp"}),
    );

    let kinds: Vec<ResultKind> = out.iter().map(|r| r.kind).collect();
    assert_eq!(
      kinds,
      vec![
        ResultKind::BatchProgress,
        ResultKind::BatchProgress,
        ResultKind::BatchCompleted
      ]
    );
    assert_eq!(out[1].data.as_ref().unwrap()["progress"], 100);
    assert_eq!(out[2].data.as_ref().unwrap()["total"], 75);
    assert_eq!(worker.cached_results(), 0);
  }

  #[tokio::test]
  async fn test_spawned_worker_round_trip() {
    let mut handle = worker().spawn().unwrap();

    let responses = handle
      .call(
        OperationKind::OptimizeQueries,
        json!({"items": [{"id": "a"}, {"id": "b"}], "limit": 1}),
      )
      .await
      .unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].data.as_ref().unwrap()["returned"], 1);
  }

  #[tokio::test]
  async fn test_spawned_worker_answers_in_arrival_order() {
    let mut handle = worker().spawn().unwrap();
    let bad = handle
      .submit(OperationKind::CalculateAnalytics, json!("oops"))
      .unwrap();
    let good = handle
      .submit(OperationKind::CalculateAnalytics, json!({}))
      .unwrap();

    let first = handle.recv().await.unwrap();
    let second = handle.recv().await.unwrap();
    assert_eq!(first.task_id, bad);
    assert_eq!(first.kind, ResultKind::Error);
    assert_eq!(second.task_id, good);
    assert_eq!(second.kind, ResultKind::AnalyticsCalculated);
  }
}
