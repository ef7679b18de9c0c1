//! The request-interception layer: lifecycle, strategies, control messages
//! and background sync.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::fetch::Fetcher;
use super::policy::{RoutePolicy, Strategy};
use super::store::ResponseStore;
use super::types::{CacheSource, NetRequest, NetResponse, Served};
use crate::config::NetworkConfig;

pub const DATA_SYNC_TAG: &str = "data-sync";
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

const PARTITION_PREFIX: &str = "frontdesk";

/// Where the layer is in its install/activate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Idle,
  /// Installed and waiting to take over
  Installed,
  /// Serving fetches
  Active,
}

/// Messages the host page can post to the layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
  GetVersion,
  ClearCache,
  CacheUrls { urls: Vec<String> },
}

/// Acknowledgement sent back on a message's reply port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlReply {
  Ack,
  Version(String),
  Cleared { partitions: usize },
  Cached { cached: usize, failed: usize },
  Failed { message: String },
}

/// Outcome of a batch of URL refreshes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
  pub cached: usize,
  pub failed: usize,
  pub purged: usize,
}

/// Versioned offline cache sitting between the app and the network.
#[derive(Clone)]
pub struct NetworkCache {
  version: String,
  origin: Url,
  static_assets: Vec<String>,
  critical_urls: Vec<String>,
  navigation_urls: Vec<String>,
  policy: RoutePolicy,
  store: Arc<dyn ResponseStore>,
  fetcher: Arc<dyn Fetcher>,
  state: Arc<Mutex<LifecycleState>>,
  refreshes: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NetworkCache {
  pub fn new(
    config: &NetworkConfig,
    store: Arc<dyn ResponseStore>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid network origin {}: {}", config.origin, e))?;
    Ok(Self {
      version: config.version.clone(),
      origin,
      static_assets: config.static_assets.clone(),
      critical_urls: config.critical_urls.clone(),
      navigation_urls: config.navigation_urls.clone(),
      policy: RoutePolicy::new(config),
      store,
      fetcher,
      state: Arc::new(Mutex::new(LifecycleState::Idle)),
      refreshes: Arc::new(Mutex::new(Vec::new())),
    })
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn policy(&self) -> &RoutePolicy {
    &self.policy
  }

  pub fn static_partition(&self) -> String {
    format!("{}-static-{}", PARTITION_PREFIX, self.version)
  }

  pub fn dynamic_partition(&self) -> String {
    format!("{}-dynamic-{}", PARTITION_PREFIX, self.version)
  }

  pub fn state(&self) -> LifecycleState {
    *lock(&self.state)
  }

  fn set_state(&self, state: LifecycleState) {
    *lock(&self.state) = state;
  }

  fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL {}: {}", url, e))
  }

  // ===== Lifecycle =====

  /// Precache the app shell into the static partition and open the dynamic
  /// one. Assets that fail to download are logged and skipped.
  pub async fn install(&self) -> Result<RefreshReport> {
    info!(version = %self.version, "installing network cache");
    let report = self
      .cache_urls(&self.static_partition(), &self.static_assets)
      .await?;
    self.store.open(&self.dynamic_partition())?;
    self.set_state(LifecycleState::Installed);
    info!(
      cached = report.cached,
      failed = report.failed,
      "network cache installed"
    );
    Ok(report)
  }

  /// Drop every partition not belonging to this version and start serving.
  pub async fn activate(&self) -> Result<usize> {
    if self.state() == LifecycleState::Idle {
      return Err(eyre!("Cannot activate before install"));
    }
    let purged = self.purge_stale_partitions()?;
    self.set_state(LifecycleState::Active);
    info!(version = %self.version, purged, "network cache active, clients claimed");
    Ok(purged)
  }

  /// Activate right away instead of waiting for older instances to go.
  pub async fn skip_waiting(&self) -> Result<()> {
    match self.state() {
      LifecycleState::Installed => self.activate().await.map(|_| ()),
      LifecycleState::Active => Ok(()),
      LifecycleState::Idle => Err(eyre!("Cannot skip waiting before install")),
    }
  }

  fn purge_stale_partitions(&self) -> Result<usize> {
    let keep = [self.static_partition(), self.dynamic_partition()];
    let mut purged = 0;
    for partition in self.store.partitions()? {
      if keep.contains(&partition) {
        continue;
      }
      debug!(partition = %partition, "deleting stale cache partition");
      if self.store.delete_partition(&partition)? {
        purged += 1;
      }
    }
    Ok(purged)
  }

  // ===== Fetch serving =====

  /// Serve an intercepted request.
  ///
  /// Never fails: when neither network nor cache can answer, the result is
  /// a synthetic 503.
  pub async fn handle_fetch(&self, request: &NetRequest) -> Served {
    if self.state() != LifecycleState::Active {
      return match self.fetcher.fetch(request).await {
        Ok(response) => Served::new(response, CacheSource::Network),
        Err(_) => Served::offline(),
      };
    }

    match self.policy.classify(request) {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    }
  }

  async fn cache_first(&self, request: &NetRequest) -> Served {
    let partition = self.static_partition();
    if let Some(cached) = self.lookup(&partition, request) {
      return Served::new(cached, CacheSource::Cache);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        store_if_cacheable(self.store.as_ref(), &partition, request, &response);
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache-first fetch failed");
        Served::offline()
      }
    }
  }

  async fn network_first(&self, request: &NetRequest) -> Served {
    let partition = self.dynamic_partition();
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        store_if_cacheable(self.store.as_ref(), &partition, request, &response);
        Served::new(response, CacheSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network-first fetch failed, trying cache");
        match self.lookup(&partition, request) {
          Some(cached) => Served::new(cached, CacheSource::Cache),
          None => Served::offline(),
        }
      }
    }
  }

  async fn stale_while_revalidate(&self, request: &NetRequest) -> Served {
    let partition = self.dynamic_partition();
    let Some(cached) = self.lookup(&partition, request) else {
      return match self.fetcher.fetch(request).await {
        Ok(response) => {
          store_if_cacheable(self.store.as_ref(), &partition, request, &response);
          Served::new(response, CacheSource::Network)
        }
        Err(_) => Served::offline(),
      };
    };

    let store = Arc::clone(&self.store);
    let fetcher = Arc::clone(&self.fetcher);
    let request_owned = request.clone();
    let handle = tokio::spawn(async move {
      match fetcher.fetch(&request_owned).await {
        Ok(response) => {
          store_if_cacheable(store.as_ref(), &partition, &request_owned, &response)
        }
        Err(e) => debug!(url = %request_owned.url, error = %e, "background refresh failed"),
      }
    });
    self.track(handle);

    Served::new(cached, CacheSource::Stale)
  }

  fn lookup(&self, partition: &str, request: &NetRequest) -> Option<NetResponse> {
    match self.store.get(partition, &request.cache_key()) {
      Ok(found) => found,
      Err(e) => {
        warn!(partition, url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn track(&self, handle: JoinHandle<()>) {
    let mut refreshes = lock(&self.refreshes);
    refreshes.retain(|h| !h.is_finished());
    refreshes.push(handle);
  }

  /// Wait for every background refresh started so far.
  pub async fn settle(&self) {
    let handles: Vec<JoinHandle<()>> = lock(&self.refreshes).drain(..).collect();
    join_all(handles).await;
  }

  // ===== Control messages =====

  /// Act on a host page message and acknowledge it on `reply`.
  ///
  /// The reply is always sent; a failure is answered with
  /// [`ControlReply::Failed`] and then returned.
  pub async fn handle_message(
    &self,
    message: ControlMessage,
    reply: oneshot::Sender<ControlReply>,
  ) -> Result<()> {
    let (answer, outcome) = match self.answer(message).await {
      Ok(answer) => (answer, Ok(())),
      Err(e) => (
        ControlReply::Failed {
          message: e.to_string(),
        },
        Err(e),
      ),
    };

    if reply.send(answer).is_err() {
      debug!("control message reply port closed");
    }
    outcome
  }

  async fn answer(&self, message: ControlMessage) -> Result<ControlReply> {
    let answer = match message {
      ControlMessage::SkipWaiting => {
        self.skip_waiting().await?;
        ControlReply::Ack
      }
      ControlMessage::GetVersion => ControlReply::Version(self.version.clone()),
      ControlMessage::ClearCache => ControlReply::Cleared {
        partitions: self.store.clear()?,
      },
      ControlMessage::CacheUrls { urls } => {
        let report = self.cache_urls(&self.dynamic_partition(), &urls).await?;
        ControlReply::Cached {
          cached: report.cached,
          failed: report.failed,
        }
      }
    };
    Ok(answer)
  }

  // ===== Background sync =====

  /// React to a sync signal. Unknown tags are ignored.
  pub async fn handle_sync(&self, tag: &str) -> Result<RefreshReport> {
    match tag {
      DATA_SYNC_TAG => {
        let report = self
          .cache_urls(&self.dynamic_partition(), &self.critical_urls)
          .await?;
        info!(tag, cached = report.cached, failed = report.failed, "data refreshed");
        Ok(report)
      }
      BACKGROUND_SYNC_TAG => {
        let purged = self.purge_stale_partitions()?;
        let mut report = self
          .cache_urls(&self.dynamic_partition(), &self.critical_urls)
          .await?;
        let navigation = self
          .cache_urls(&self.dynamic_partition(), &self.navigation_urls)
          .await?;
        report.cached += navigation.cached;
        report.failed += navigation.failed;
        report.purged = purged;
        info!(
          tag,
          cached = report.cached,
          failed = report.failed,
          purged,
          "background sync finished"
        );
        Ok(report)
      }
      other => {
        debug!(tag = other, "ignoring unknown sync tag");
        Ok(RefreshReport::default())
      }
    }
  }

  /// Fetch each URL and store the successful ones in `partition`.
  async fn cache_urls(&self, partition: &str, urls: &[String]) -> Result<RefreshReport> {
    self.store.open(partition)?;
    let mut report = RefreshReport::default();

    for url in urls {
      let request = match self.resolve(url) {
        Ok(url) => NetRequest::get(url),
        Err(e) => {
          warn!(url = %url, error = %e, "skipping URL");
          report.failed += 1;
          continue;
        }
      };

      match self.fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          self
            .store
            .put(partition, &request.cache_key(), &response)?;
          report.cached += 1;
        }
        Ok(response) => {
          warn!(url = %request.url, status = response.status, "not caching URL");
          report.failed += 1;
        }
        Err(e) => {
          warn!(url = %request.url, error = %e, "failed to fetch URL for caching");
          report.failed += 1;
        }
      }
    }
    Ok(report)
  }
}

/// Only successful GET responses are kept.
fn store_if_cacheable(
  store: &dyn ResponseStore,
  partition: &str,
  request: &NetRequest,
  response: &NetResponse,
) {
  if request.method != reqwest::Method::GET || !response.is_success() {
    return;
  }
  if let Err(e) = store.put(partition, &request.cache_key(), response) {
    warn!(partition, url = %request.url, error = %e, "failed to cache response");
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::netcache::{MemoryFetcher, MemoryResponseStore};
  use reqwest::Method;
  use serde_json::json;

  const ORIGIN: &str = "http://localhost:3000";

  fn config(version: &str) -> NetworkConfig {
    NetworkConfig {
      version: version.to_string(),
      origin: ORIGIN.to_string(),
      ..NetworkConfig::default()
    }
  }

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  fn ok(body: &str) -> NetResponse {
    NetResponse::new(200, body)
  }

  struct Harness {
    cache: NetworkCache,
    store: Arc<MemoryResponseStore>,
    fetcher: Arc<MemoryFetcher>,
  }

  fn harness(version: &str) -> Harness {
    let store = Arc::new(MemoryResponseStore::new());
    let fetcher = Arc::new(MemoryFetcher::new());
    let cache = NetworkCache::new(&config(version), store.clone(), fetcher.clone()).unwrap();
    Harness {
      cache,
      store,
      fetcher,
    }
  }

  async fn active(version: &str) -> Harness {
    let h = harness(version);
    h.cache.install().await.unwrap();
    h.cache.activate().await.unwrap();
    h
  }

  fn get(path: &str) -> NetRequest {
    NetRequest::parse("GET", &url(path)).unwrap()
  }

  #[tokio::test]
  async fn test_install_is_best_effort() {
    let h = harness("v1");
    h.fetcher.route(&url("/"), ok("shell"));
    h.fetcher.route(&url("/manifest.json"), ok("{}"));

    let report = h.cache.install().await.unwrap();
    assert_eq!(report.cached, 2);
    assert!(report.failed > 0);
    assert_eq!(h.cache.state(), LifecycleState::Installed);

    let partitions = h.store.partitions().unwrap();
    assert!(partitions.contains(&"frontdesk-static-v1".to_string()));
    assert!(partitions.contains(&"frontdesk-dynamic-v1".to_string()));
    assert!(h
      .store
      .get("frontdesk-static-v1", &get("/").cache_key())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_activate_purges_old_versions() {
    let h = harness("v2");
    h.store.open("frontdesk-static-v1").unwrap();
    h.store.open("frontdesk-dynamic-v1").unwrap();

    assert!(h.cache.activate().await.is_err());
    h.cache.install().await.unwrap();
    assert_eq!(h.cache.activate().await.unwrap(), 2);
    assert_eq!(h.cache.state(), LifecycleState::Active);
    assert_eq!(
      h.store.partitions().unwrap(),
      vec![
        "frontdesk-dynamic-v2".to_string(),
        "frontdesk-static-v2".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn test_cache_first_serves_static_partition() {
    let h = harness("v1");
    h.fetcher.route(&url("/icons/icon-192x192.png"), ok("png"));
    h.cache.install().await.unwrap();
    h.cache.activate().await.unwrap();

    let first = h.cache.handle_fetch(&get("/icons/icon-192x192.png")).await;
    assert_eq!(first.source, CacheSource::Cache);
    assert_eq!(first.response.body, b"png".to_vec());

    let calls = h.fetcher.calls();
    h.fetcher.set_offline(true);
    let second = h.cache.handle_fetch(&get("/icons/icon-192x192.png")).await;
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(h.fetcher.calls(), calls);
  }

  #[tokio::test]
  async fn test_cache_first_miss_goes_to_network_then_caches() {
    let h = active("v1").await;
    h.fetcher.route(&url("/static/js/app.js"), ok("js"));

    let first = h.cache.handle_fetch(&get("/static/js/app.js")).await;
    assert_eq!(first.source, CacheSource::Network);

    h.fetcher.set_offline(true);
    let second = h.cache.handle_fetch(&get("/static/js/app.js")).await;
    assert_eq!(second.source, CacheSource::Cache);

    let missing = h.cache.handle_fetch(&get("/static/js/other.js")).await;
    assert_eq!(missing.source, CacheSource::Offline);
    assert_eq!(missing.response.status, 503);
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_dynamic_partition() {
    let h = active("v1").await;
    h.fetcher.route(&url("/api/rooms"), ok("[1]"));

    let online = h.cache.handle_fetch(&get("/api/rooms")).await;
    assert_eq!(online.source, CacheSource::Network);

    h.fetcher.set_offline(true);
    let offline = h.cache.handle_fetch(&get("/api/rooms")).await;
    assert_eq!(offline.source, CacheSource::Cache);
    assert_eq!(offline.response.body, b"[1]".to_vec());

    let unknown = h.cache.handle_fetch(&get("/api/bills")).await;
    assert_eq!(unknown.source, CacheSource::Offline);
    assert_eq!(unknown.response.body, b"Service Unavailable".to_vec());
    assert_eq!(unknown.response.header("content-type"), Some("text/plain"));
  }

  #[tokio::test]
  async fn test_mutating_requests_are_never_cached() {
    let h = active("v1").await;
    h.fetcher.route(&url("/api/rooms"), ok("created"));

    let post = NetRequest::new(Method::POST, Url::parse(&url("/api/rooms")).unwrap());
    let served = h.cache.handle_fetch(&post).await;
    assert_eq!(served.source, CacheSource::Network);

    h.fetcher.set_offline(true);
    assert_eq!(h.cache.handle_fetch(&post).await.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_error_statuses_are_not_cached() {
    let h = active("v1").await;
    h.fetcher.route(&url("/api/rooms"), NetResponse::new(500, "boom"));

    let served = h.cache.handle_fetch(&get("/api/rooms")).await;
    assert_eq!(served.response.status, 500);
    assert!(h
      .store
      .get("frontdesk-dynamic-v1", &get("/api/rooms").cache_key())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_stale_while_revalidate() {
    let h = active("v1").await;
    h.fetcher.route(&url("/dashboard"), ok("old"));

    let first = h.cache.handle_fetch(&get("/dashboard")).await;
    assert_eq!(first.source, CacheSource::Network);

    h.fetcher.route(&url("/dashboard"), ok("new"));
    let second = h.cache.handle_fetch(&get("/dashboard")).await;
    assert_eq!(second.source, CacheSource::Stale);
    assert_eq!(second.response.body, b"old".to_vec());

    h.cache.settle().await;
    let third = h.cache.handle_fetch(&get("/dashboard")).await;
    assert_eq!(third.response.body, b"new".to_vec());
  }

  #[tokio::test]
  async fn test_passthrough_before_activation() {
    let h = harness("v1");
    h.fetcher.route(&url("/api/rooms"), ok("[]"));
    let served = h.cache.handle_fetch(&get("/api/rooms")).await;
    assert_eq!(served.source, CacheSource::Network);
    assert!(h.store.partitions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_control_messages() {
    let h = harness("v7");
    h.cache.install().await.unwrap();

    let (tx, rx) = oneshot::channel();
    h.cache
      .handle_message(ControlMessage::GetVersion, tx)
      .await
      .unwrap();
    assert_eq!(rx.await.unwrap(), ControlReply::Version("v7".to_string()));

    let (tx, rx) = oneshot::channel();
    h.cache
      .handle_message(ControlMessage::SkipWaiting, tx)
      .await
      .unwrap();
    assert_eq!(rx.await.unwrap(), ControlReply::Ack);
    assert_eq!(h.cache.state(), LifecycleState::Active);

    h.fetcher.route(&url("/rooms"), ok("rooms"));
    let (tx, rx) = oneshot::channel();
    h.cache
      .handle_message(
        ControlMessage::CacheUrls {
          urls: vec!["/rooms".to_string(), "/missing".to_string()],
        },
        tx,
      )
      .await
      .unwrap();
    assert_eq!(
      rx.await.unwrap(),
      ControlReply::Cached {
        cached: 1,
        failed: 1
      }
    );

    let (tx, rx) = oneshot::channel();
    h.cache
      .handle_message(ControlMessage::ClearCache, tx)
      .await
      .unwrap();
    assert_eq!(rx.await.unwrap(), ControlReply::Cleared { partitions: 2 });
    assert!(h.store.partitions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_control_message_is_still_answered() {
    let h = harness("v1");

    let (tx, rx) = oneshot::channel();
    let outcome = h.cache.handle_message(ControlMessage::SkipWaiting, tx).await;
    assert!(outcome.is_err());
    match rx.await.unwrap() {
      ControlReply::Failed { message } => assert!(message.contains("before install")),
      other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(h.cache.state(), LifecycleState::Idle);
  }

  #[test]
  fn test_control_message_wire_format() {
    let skip: ControlMessage = serde_json::from_value(json!({"type": "SKIP_WAITING"})).unwrap();
    assert_eq!(skip, ControlMessage::SkipWaiting);

    let urls: ControlMessage = serde_json::from_value(json!({
      "type": "CACHE_URLS",
      "data": {"urls": ["/a", "/b"]}
    }))
    .unwrap();
    assert_eq!(
      urls,
      ControlMessage::CacheUrls {
        urls: vec!["/a".to_string(), "/b".to_string()]
      }
    );
  }

  #[tokio::test]
  async fn test_sync_tags() {
    let h = active("v1").await;
    h.store.open("frontdesk-dynamic-v0").unwrap();
    h.fetcher.route(&url("/api/rooms"), ok("rooms"));
    h.fetcher.route(&url("/dashboard"), ok("dash"));

    let data = h.cache.handle_sync(DATA_SYNC_TAG).await.unwrap();
    assert_eq!(data.cached, 1);
    assert_eq!(data.purged, 0);

    let background = h.cache.handle_sync(BACKGROUND_SYNC_TAG).await.unwrap();
    assert_eq!(background.cached, 2);
    assert_eq!(background.purged, 1);

    let ignored = h.cache.handle_sync("push").await.unwrap();
    assert_eq!(ignored, RefreshReport::default());
  }
}
