//! Request classification: maps an intercepted request to a caching
//! strategy class by method and URL shape. Pure and deterministic.

use url::Url;

/// The strategy class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Non-GET: pass through untouched, no interception.
  Ignored,
  /// API call: network-first with an offline JSON sentinel.
  ApiCall,
  /// Static resource: cache-first.
  StaticAsset,
  /// Anything else: network-first with cache fallback.
  DynamicPage,
}

/// Classifier configured with the URL prefixes of the app.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefix: String,
  static_prefixes: Vec<String>,
}

impl Classifier {
  pub fn new(api_prefix: String, static_prefixes: Vec<String>) -> Self {
    Self {
      api_prefix,
      static_prefixes,
    }
  }

  /// Classify a request. First match wins:
  /// non-GET, then API prefix, then static prefixes, then dynamic.
  pub fn classify(&self, method: &str, url: &Url) -> RequestClass {
    if !method.eq_ignore_ascii_case("GET") {
      return RequestClass::Ignored;
    }

    let path = url.path();
    if path.contains(self.api_prefix.as_str()) {
      return RequestClass::ApiCall;
    }

    if self.static_prefixes.iter().any(|p| path.contains(p.as_str())) {
      return RequestClass::StaticAsset;
    }

    RequestClass::DynamicPage
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    Classifier::new(
      "/mobile/api/".to_string(),
      vec![
        "/static/".to_string(),
        "/images/".to_string(),
        "/css/".to_string(),
        "/js/".to_string(),
      ],
    )
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_non_get_is_ignored() {
    let c = classifier();
    let u = url("http://localhost/mobile/api/scan");
    assert_eq!(c.classify("POST", &u), RequestClass::Ignored);
    assert_eq!(c.classify("PUT", &u), RequestClass::Ignored);
    assert_eq!(c.classify("DELETE", &u), RequestClass::Ignored);
  }

  #[test]
  fn test_api_prefix_wins_over_static() {
    // Rule order matters: an API path containing /js/ is still an API call.
    let c = classifier();
    let u = url("http://localhost/mobile/api/js/config");
    assert_eq!(c.classify("GET", &u), RequestClass::ApiCall);
  }

  #[test]
  fn test_static_prefixes() {
    let c = classifier();
    assert_eq!(
      c.classify("GET", &url("http://localhost/static/js/app.js")),
      RequestClass::StaticAsset
    );
    assert_eq!(
      c.classify("GET", &url("http://localhost/images/logo.png")),
      RequestClass::StaticAsset
    );
    assert_eq!(
      c.classify("GET", &url("http://localhost/css/mobile.css")),
      RequestClass::StaticAsset
    );
  }

  #[test]
  fn test_everything_else_is_dynamic() {
    let c = classifier();
    assert_eq!(
      c.classify("GET", &url("http://localhost/mobile/app/dashboard")),
      RequestClass::DynamicPage
    );
    assert_eq!(
      c.classify("GET", &url("http://localhost/")),
      RequestClass::DynamicPage
    );
  }

  #[test]
  fn test_deterministic() {
    let c = classifier();
    let u = url("http://localhost/mobile/app");
    assert_eq!(c.classify("GET", &u), c.classify("GET", &u));
  }
}
