//! Network access for the cache layer.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::types::{NetRequest, NetResponse};

/// Performs the real request behind an intercepted one.
///
/// An `Err` means the network itself failed; HTTP error statuses come back
/// as ordinary responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &NetRequest) -> Result<NetResponse>;
}

/// Fetcher backed by `reqwest`.
#[derive(Clone, Default)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    let mut out = NetResponse::new(status, body.to_vec());
    out.headers = headers;
    Ok(out)
  }
}

/// Scripted fetcher serving canned responses by URL.
///
/// Unknown URLs get a 404; `set_offline(true)` turns every call into a
/// network error.
#[derive(Default)]
pub struct MemoryFetcher {
  routes: Mutex<HashMap<String, NetResponse>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl MemoryFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, url: &str, response: NetResponse) {
    if let Ok(mut routes) = self.routes.lock() {
      routes.insert(url.to_string(), response);
    }
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
  async fn fetch(&self, request: &NetRequest) -> Result<NetResponse> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Network unreachable"));
    }
    let routes = self
      .routes
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      routes
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| NetResponse::new(404, "Not Found")),
    )
  }
}
