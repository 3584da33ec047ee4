//! Strategy engine: serves every intercepted request through one of three
//! caching strategies, selected by classification.
//!
//! Each strategy is an ordered fallback cascade. Cache writes along the way
//! are side-effects of the primary response: their failures are logged and
//! swallowed, never surfaced to the caller. A classified GET never fails
//! outright; it degrades to cached or synthetic content.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStore, CachedResponse, API_CACHE, RUNTIME_CACHE};
use crate::classify::{Classifier, RequestClass};
use crate::http::{request_key, FetchRequest, ResponseSnapshot};
use crate::net::Network;

/// Default text body served when a non-API request misses both cache and
/// network and no fallback page is cached.
const OFFLINE_TEXT: &str = "Offline";

pub struct StrategyEngine<S, N> {
  caches: Arc<S>,
  net: Arc<N>,
  classifier: Classifier,
  /// Path of the page served when a dynamic page cannot be reached or
  /// found in cache (must be precached to take effect).
  offline_fallback: Option<String>,
  /// Localized notice embedded in the offline API sentinel.
  offline_message: String,
}

impl<S: CacheStore, N: Network> StrategyEngine<S, N> {
  pub fn new(
    caches: Arc<S>,
    net: Arc<N>,
    classifier: Classifier,
    offline_fallback: Option<String>,
    offline_message: String,
  ) -> Self {
    Self {
      caches,
      net,
      classifier,
      offline_fallback,
      offline_message,
    }
  }

  /// Serve one intercepted request.
  ///
  /// Only the `Ignored` class can return an error: those requests pass
  /// through to the network untouched, so a network failure is the
  /// caller's to surface.
  pub async fn handle(&self, req: &FetchRequest) -> Result<ResponseSnapshot> {
    match self.classifier.classify(&req.method, &req.url) {
      RequestClass::Ignored => self.net.fetch(req).await,
      RequestClass::ApiCall => Ok(self.network_first_api(req).await),
      RequestClass::StaticAsset => Ok(self.cache_first(req).await),
      RequestClass::DynamicPage => Ok(self.network_first_page(req).await),
    }
  }

  /// Network-first with an offline JSON sentinel (API calls).
  async fn network_first_api(&self, req: &FetchRequest) -> ResponseSnapshot {
    let key = req.cache_key();

    match self.net.fetch(req).await {
      Ok(resp) => {
        if resp.status == 200 {
          self.cache_write(API_CACHE, &key, &resp);
        }
        resp
      }
      Err(e) => {
        debug!(url = %req.url, "API fetch failed, trying cache: {}", e);
        match self.lookup(API_CACHE, &key) {
          Some(cached) => {
            debug!(url = %req.url, cached_at = %cached.cached_at, "serving cached API response");
            cached.snapshot
          }
          None => ResponseSnapshot::offline_api(&self.offline_message),
        }
      }
    }
  }

  /// Cache-first (static assets).
  async fn cache_first(&self, req: &FetchRequest) -> ResponseSnapshot {
    let key = req.cache_key();

    if let Some(cached) = self.lookup(RUNTIME_CACHE, &key) {
      return cached.snapshot;
    }

    match self.net.fetch(req).await {
      Ok(resp) => {
        if resp.status == 200 {
          self.cache_write(RUNTIME_CACHE, &key, &resp);
        }
        // Non-200s are returned unmodified and never persisted.
        resp
      }
      Err(e) => {
        debug!(url = %req.url, "static fetch failed: {}", e);
        if req.is_image() {
          ResponseSnapshot::placeholder_image()
        } else {
          ResponseSnapshot::offline_text(OFFLINE_TEXT)
        }
      }
    }
  }

  /// Network-first with cache fallback (dynamic pages, the default).
  async fn network_first_page(&self, req: &FetchRequest) -> ResponseSnapshot {
    let key = req.cache_key();

    match self.net.fetch(req).await {
      Ok(resp) => {
        if resp.status == 200 {
          self.cache_write(RUNTIME_CACHE, &key, &resp);
        }
        resp
      }
      Err(e) => {
        debug!(url = %req.url, "page fetch failed, trying cache: {}", e);

        // Dynamic pages are not generation-scoped on the read path.
        if let Some(cached) = self.lookup_any(&key) {
          return cached.snapshot;
        }

        if let Some(page) = self.offline_fallback_page() {
          return page;
        }

        ResponseSnapshot::offline_text(OFFLINE_TEXT)
      }
    }
  }

  /// The configured offline fallback page, if it is in any cache.
  fn offline_fallback_page(&self) -> Option<ResponseSnapshot> {
    let path = self.offline_fallback.as_deref()?;
    let key = request_key("GET", path);
    self.lookup_any(&key).map(|cached| cached.snapshot)
  }

  /// Cache read that treats storage errors as misses. A read racing a
  /// generation purge falls through to the next step instead of failing.
  fn lookup(&self, cache: &str, key: &str) -> Option<CachedResponse> {
    match self.caches.get(cache, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(cache, "cache read failed: {}", e);
        None
      }
    }
  }

  fn lookup_any(&self, key: &str) -> Option<CachedResponse> {
    match self.caches.get_any(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("cache read failed: {}", e);
        None
      }
    }
  }

  /// Secondary side-effect of a successful fetch: persist a copy. Failure
  /// must never affect the response already being returned.
  fn cache_write(&self, cache: &str, key: &str, snapshot: &ResponseSnapshot) {
    if let Err(e) = self.caches.put(cache, key, snapshot) {
      warn!(cache, "cache write failed: {}", e);
    }
  }
}
