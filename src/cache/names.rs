//! Cache generation names.
//!
//! Each generation name embeds the cache version. The three active roles
//! must be bumped together whenever the stored response format changes in
//! an incompatible way; activation then purges everything carrying an old
//! tag.

/// App-shell generation: precached URLs, populated during install.
pub const SHELL_CACHE: &str = "scangate-shell-v2";

/// Runtime generation: static assets and dynamic pages cached on the fly.
pub const RUNTIME_CACHE: &str = "scangate-runtime-v2";

/// API generation: successful API responses for offline replay.
pub const API_CACHE: &str = "scangate-api-v2";

/// Pre-v2 dynamic cache. No longer written; the name is kept so readers
/// of old databases know what the purge is deleting.
#[allow(dead_code)]
pub const LEGACY_DYNAMIC_CACHE: &str = "scangate-dynamic-v1";

/// The generations that survive activation. Anything else is garbage.
pub fn protected_generations() -> [&'static str; 3] {
  [SHELL_CACHE, RUNTIME_CACHE, API_CACHE]
}
