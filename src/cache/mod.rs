//! Versioned response caching for offline support.
//!
//! This module provides the named cache set that backs the strategy
//! engine:
//! - Three independently versioned generations (shell, runtime, API)
//! - A storage trait with a SQLite implementation
//! - The install/activate lifecycle that creates and purges generations

mod lifecycle;
mod names;
mod store;

pub use lifecycle::{ActivationReport, Lifecycle, WorkerPhase};
pub use names::{protected_generations, API_CACHE, RUNTIME_CACHE, SHELL_CACHE};
pub use store::{CacheStore, CachedResponse, SqliteCacheStore};

#[cfg(test)]
pub use store::testing::FailingCacheStore;
