//! Request classification: which caching strategy serves which request.

use reqwest::Method;
use std::collections::BTreeSet;
use url::Url;

use super::types::{is_mutating_method, NetRequest};
use crate::config::NetworkConfig;

/// How a request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Static partition first, network on a miss
  CacheFirst,
  /// Network first, dynamic partition when the network fails
  NetworkFirst,
  /// Cached copy right away, refreshed in the background
  StaleWhileRevalidate,
}

impl Strategy {
  pub fn as_str(self) -> &'static str {
    match self {
      Strategy::CacheFirst => "cache-first",
      Strategy::NetworkFirst => "network-first",
      Strategy::StaleWhileRevalidate => "stale-while-revalidate",
    }
  }
}

/// Static rules mapping a request to a [`Strategy`].
///
/// Rules are checked in order:
/// 1. known static asset path (exact match, or under a static prefix) → cache-first
/// 2. dynamic data path prefix, or a mutating method → network-first
/// 3. anything else → stale-while-revalidate
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  static_assets: BTreeSet<String>,
  static_prefixes: Vec<String>,
  dynamic_prefixes: Vec<String>,
}

impl RoutePolicy {
  pub fn new(config: &NetworkConfig) -> Self {
    Self {
      static_assets: config.static_assets.iter().cloned().collect(),
      static_prefixes: config.static_prefixes.clone(),
      dynamic_prefixes: config.dynamic_paths.clone(),
    }
  }

  pub fn is_static_asset(&self, path: &str) -> bool {
    self.static_assets.contains(path) || self.static_prefixes.iter().any(|p| path.starts_with(p))
  }

  pub fn is_dynamic_path(&self, path: &str) -> bool {
    self.dynamic_prefixes.iter().any(|p| path.starts_with(p))
  }

  pub fn classify(&self, request: &NetRequest) -> Strategy {
    self.classify_parts(&request.method, &request.url)
  }

  pub fn classify_parts(&self, method: &Method, url: &Url) -> Strategy {
    let path = url.path();
    if self.is_static_asset(path) {
      Strategy::CacheFirst
    } else if self.is_dynamic_path(path) || is_mutating_method(method) {
      Strategy::NetworkFirst
    } else {
      Strategy::StaleWhileRevalidate
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classify(method: &str, path: &str) -> Strategy {
    let policy = RoutePolicy::new(&NetworkConfig::default());
    let request = NetRequest::parse(method, &format!("http://localhost:3000{}", path)).unwrap();
    policy.classify(&request)
  }

  #[test]
  fn test_api_paths_are_network_first() {
    assert_eq!(classify("GET", "/api/rooms"), Strategy::NetworkFirst);
    assert_eq!(classify("POST", "/api/rooms"), Strategy::NetworkFirst);
  }

  #[test]
  fn test_icons_are_cache_first() {
    assert_eq!(
      classify("GET", "/icons/icon-192x192.png"),
      Strategy::CacheFirst
    );
    assert_eq!(classify("GET", "/static/js/main.1234.js"), Strategy::CacheFirst);
  }

  #[test]
  fn test_other_pages_are_stale_while_revalidate() {
    assert_eq!(classify("GET", "/dashboard"), Strategy::StaleWhileRevalidate);
  }

  #[test]
  fn test_mutating_method_outside_api_is_network_first() {
    assert_eq!(classify("DELETE", "/dashboard"), Strategy::NetworkFirst);
  }

  #[test]
  fn test_query_string_is_ignored() {
    assert_eq!(classify("GET", "/manifest.json?v=3"), Strategy::CacheFirst);
  }
}
