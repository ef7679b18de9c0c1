use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use url::Url;

use super::api_types::{ApiAddResponse, RemoteDocument};
use super::RemoteCollections;
use crate::config::{Config, RemoteConfig};

/// HTTP client for the remote document API.
///
/// Endpoints, relative to the configured base URL:
/// - `POST collections/{name}/documents` with the record as JSON body, answers `{ "id": ... }`
/// - `GET collections/{name}/documents`, answers `[{ "id": ..., "data": {...} }]`
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpRemote {
  pub fn new(remote: &RemoteConfig) -> Result<Self> {
    let mut headers = HeaderMap::new();
    if let Some(token) = Config::get_api_token() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    // A trailing slash keeps the last path segment when joining
    let mut base = remote.base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid remote URL {}: {}", remote.base_url, e))?;

    Ok(Self { client, base_url })
  }

  fn documents_url(&self, collection: &str) -> Result<Url> {
    self
      .base_url
      .join(&format!("collections/{}/documents", collection))
      .map_err(|e| eyre!("Invalid collection name {}: {}", collection, e))
  }
}

#[async_trait]
impl RemoteCollections for HttpRemote {
  async fn add_document(&self, collection: &str, record: &Value) -> Result<String> {
    let url = self.documents_url(collection)?;

    let response: ApiAddResponse = self
      .client
      .post(url)
      .json(record)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to add document to {}: {}", collection, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse add response for {}: {}", collection, e))?;

    Ok(response.id)
  }

  async fn list_documents(&self, collection: &str) -> Result<Vec<RemoteDocument>> {
    let url = self.documents_url(collection)?;

    let documents: Vec<RemoteDocument> = self
      .client
      .get(url)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to list documents in {}: {}", collection, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse documents in {}: {}", collection, e))?;

    Ok(documents)
  }
}
