//! Request/response shapes seen by the network cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetRequest {
  pub method: Method,
  pub url: Url,
}

impl NetRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Parse a method name and an absolute URL.
  pub fn parse(method: &str, url: &str) -> Result<Self> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
    Ok(Self { method, url })
  }

  /// Partition key: method plus full URL.
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// POST, PUT, PATCH or DELETE
  pub fn is_mutating(&self) -> bool {
    is_mutating_method(&self.method)
  }
}

/// POST, PUT, PATCH or DELETE
pub fn is_mutating_method(method: &Method) -> bool {
  [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

/// A response from the network or from a cache partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetResponse {
  pub status: u16,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default)]
  pub body: Vec<u8>,
  pub fetched_at: DateTime<Utc>,
}

impl NetResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      fetched_at: Utc::now(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// The synthetic answer when neither network nor cache can help.
  pub fn service_unavailable() -> Self {
    Self::new(503, "Service Unavailable").with_header("content-type", "text/plain")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// From a cache partition
  Cache,
  /// From the dynamic partition while a background refresh runs
  Stale,
  /// Synthetic 503, nothing was available
  Offline,
}

/// A response plus its provenance.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: NetResponse,
  pub source: CacheSource,
}

impl Served {
  pub fn new(response: NetResponse, source: CacheSource) -> Self {
    Self { response, source }
  }

  pub fn offline() -> Self {
    Self::new(NetResponse::service_unavailable(), CacheSource::Offline)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_and_key() {
    let request = NetRequest::parse("post", "http://localhost:3000/api/rooms").unwrap();
    assert_eq!(request.method, Method::POST);
    assert!(request.is_mutating());
    assert_eq!(request.cache_key(), "POST http://localhost:3000/api/rooms");
  }

  #[test]
  fn test_service_unavailable() {
    let response = NetResponse::service_unavailable();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
  }
}
