//! Network access behind a trait so strategies and sync can be exercised
//! against a scripted network in tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::http::{FetchRequest, ResponseSnapshot};

/// The gateway's view of the network.
#[async_trait]
pub trait Network: Send + Sync {
  /// Execute a request and snapshot the response.
  ///
  /// An `Err` here means the network itself failed (unreachable, timeout);
  /// HTTP error statuses come back as `Ok` snapshots.
  async fn fetch(&self, req: &FetchRequest) -> Result<ResponseSnapshot>;

  /// POST a JSON body to an absolute URL.
  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<ResponseSnapshot>;
}

/// Reqwest-backed client talking to the configured upstream origin.
#[derive(Clone)]
pub struct UpstreamClient {
  client: reqwest::Client,
}

impl UpstreamClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn snapshot(response: reqwest::Response) -> Result<ResponseSnapshot> {
    let status = response.status().as_u16();
    // The body below is already decoded and re-framed, so framing and
    // encoding headers must not be replayed with it.
    const SKIP: &[&str] = &[
      "content-length",
      "content-encoding",
      "transfer-encoding",
      "connection",
    ];
    let headers = response
      .headers()
      .iter()
      .filter(|(k, _)| !SKIP.contains(&k.as_str()))
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?
      .to_vec();

    Ok(ResponseSnapshot::new(status, headers, body))
  }
}

#[async_trait]
impl Network for UpstreamClient {
  async fn fetch(&self, req: &FetchRequest) -> Result<ResponseSnapshot> {
    let method = reqwest::Method::from_bytes(req.method.as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", req.method, e))?;

    let mut builder = self.client.request(method, req.url.clone());
    for (name, value) in &req.headers {
      builder = builder.header(name, value);
    }
    if !req.body.is_empty() {
      builder = builder.body(req.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network fetch failed for {}: {}", req.url, e))?;

    Self::snapshot(response).await
  }

  async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<ResponseSnapshot> {
    let response = self
      .client
      .post(url.clone())
      .json(body)
      .send()
      .await
      .map_err(|e| eyre!("POST to {} failed: {}", url, e))?;

    Self::snapshot(response).await
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted network double shared by the strategy, lifecycle, sync and
  //! worker tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// Scripted response for one path: a snapshot or a simulated outage.
  type Scripted = std::result::Result<ResponseSnapshot, String>;

  #[derive(Default)]
  pub struct MockNetwork {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, serde_json::Value)>>,
  }

  impl MockNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    /// Script a successful response for a path.
    pub fn respond(&self, path: &str, snapshot: ResponseSnapshot) {
      self
        .responses
        .lock()
        .unwrap()
        .insert(path.to_string(), Ok(snapshot));
    }

    /// Script a network failure for a path.
    pub fn fail(&self, path: &str) {
      self
        .responses
        .lock()
        .unwrap()
        .insert(path.to_string(), Err("connection refused".to_string()));
    }

    /// Paths fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }

    /// JSON bodies posted so far, with their paths.
    pub fn posts(&self) -> Vec<(String, serde_json::Value)> {
      self.posts.lock().unwrap().clone()
    }

    fn lookup(&self, path: &str) -> Result<ResponseSnapshot> {
      self.calls.lock().unwrap().push(path.to_string());
      match self.responses.lock().unwrap().get(path) {
        Some(Ok(snapshot)) => Ok(snapshot.clone()),
        Some(Err(msg)) => Err(eyre!("{}", msg)),
        None => Err(eyre!("no scripted response for {}", path)),
      }
    }
  }

  #[async_trait]
  impl Network for MockNetwork {
    async fn fetch(&self, req: &FetchRequest) -> Result<ResponseSnapshot> {
      self.lookup(req.url.path())
    }

    async fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<ResponseSnapshot> {
      self
        .posts
        .lock()
        .unwrap()
        .push((url.path().to_string(), body.clone()));
      self.lookup(url.path())
    }
  }
}
