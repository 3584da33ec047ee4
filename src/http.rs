//! Wire-neutral request and response snapshots.
//!
//! The gateway never hands framework types to the caching core. Incoming
//! requests are reduced to a `FetchRequest` and responses to a
//! `ResponseSnapshot`, which can be stored, cloned, and compared freely
//! (a snapshot body, unlike a streaming body, can be read more than once).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// An intercepted outgoing request, reduced to what the caching core needs.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  /// Uppercase HTTP method ("GET", "POST", ...)
  pub method: String,
  /// Absolute request URL
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchRequest {
  /// Create a GET request with no headers or body.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// Normalized request identity used as the cache key.
  pub fn cache_key(&self) -> String {
    match self.url.query() {
      Some(query) => request_key(&self.method, &format!("{}?{}", self.url.path(), query)),
      None => request_key(&self.method, self.url.path()),
    }
  }

  /// Get a request header value, case-insensitive on the name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Whether this request is for an image destination.
  ///
  /// The host environment doesn't tell us the destination, so it is
  /// inferred from the Accept header or the path extension.
  pub fn is_image(&self) -> bool {
    if let Some(accept) = self.header("accept") {
      if accept.starts_with("image/") {
        return true;
      }
    }
    let path = self.url.path();
    const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico"];
    IMAGE_EXTENSIONS
      .iter()
      .any(|ext| path.to_ascii_lowercase().ends_with(ext))
  }
}

/// Request identity: SHA256 over method + path + query for stable,
/// fixed-length keys. Only GETs are ever cached, but the method is
/// included so the key scheme never aliases across methods.
pub fn request_key(method: &str, path_and_query: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_bytes());
  hasher.update(b":");
  hasher.update(path_and_query.as_bytes());
  hex::encode(hasher.finalize())
}

/// A stored response: status, headers, body.
///
/// Snapshots are what the cache persists and what every strategy returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Synthetic offline sentinel for API calls.
  ///
  /// Deliberately HTTP 200 rather than an error status: client code that
  /// only branches on the `success` field keeps working offline. The
  /// `offline` flag is how the client tells the two apart.
  pub fn offline_api(message: &str) -> Self {
    let body = serde_json::json!({
      "success": false,
      "message": message,
      "offline": true,
    });
    Self {
      status: 200,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: body.to_string().into_bytes(),
    }
  }

  /// Minimal placeholder image for static image requests that miss both
  /// cache and network.
  pub fn placeholder_image() -> Self {
    Self {
      status: 200,
      headers: vec![("Content-Type".to_string(), "image/svg+xml".to_string())],
      body: b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec(),
    }
  }

  /// Generic plain-text offline response.
  pub fn offline_text(message: &str) -> Self {
    Self {
      status: 200,
      headers: vec![(
        "Content-Type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      body: message.as_bytes().to_vec(),
    }
  }
}
