//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::http::ResponseSnapshot;

/// A cached response plus its insertion time.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub snapshot: ResponseSnapshot,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Entries are keyed by (generation name, request identity). Reads never
/// mutate; individual entries are only removed by deleting their whole
/// generation.
pub trait CacheStore: Send + Sync {
  /// Store a response snapshot, replacing any existing entry for the key.
  fn put(&self, cache: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Look up an entry in one generation.
  fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up an entry across all generations, newest first.
  ///
  /// Dynamic pages are not generation-scoped on the read path, so their
  /// fallback may match a response stored under any generation.
  fn get_any(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// List every generation name currently holding entries.
  fn list_generations(&self) -> Result<Vec<String>>;

  /// Delete a whole generation. Returns the number of entries removed.
  fn delete_generation(&self, cache: &str) -> Result<usize>;
}

/// SQLite-based cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_key
    ON response_cache(request_key, cached_at);
"#;

impl SqliteCacheStore {
  /// Open or create the cache store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStore for SqliteCacheStore {
  fn put(&self, cache: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&snapshot.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (cache_name, request_key, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![cache, key, snapshot.status, headers, snapshot.body],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM response_cache
         WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(into_cached_response).transpose()
  }

  fn get_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM response_cache
         WHERE request_key = ?
         ORDER BY cached_at DESC
         LIMIT 1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(into_cached_response).transpose()
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM response_cache ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_generation(&self, cache: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ?",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", cache, e))?;

    Ok(deleted)
  }
}

fn into_cached_response(
  (status, headers, body, cached_at): (u16, String, Vec<u8>, String),
) -> Result<CachedResponse> {
  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;

  Ok(CachedResponse {
    snapshot: ResponseSnapshot::new(status, headers, body),
    cached_at: parse_datetime(&cached_at)?,
  })
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
pub mod testing {
  //! Store double that fails on demand, for exercising the paths where
  //! storage errors must be swallowed or skipped over.

  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  pub struct FailingCacheStore {
    inner: SqliteCacheStore,
    fail_writes: AtomicBool,
    fail_delete_of: Mutex<Option<String>>,
  }

  impl FailingCacheStore {
    pub fn new() -> Self {
      Self {
        inner: SqliteCacheStore::open_in_memory().unwrap(),
        fail_writes: AtomicBool::new(false),
        fail_delete_of: Mutex::new(None),
      }
    }

    /// Make every `put` fail from now on.
    pub fn fail_writes(&self) {
      self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make `delete_generation` fail for one generation name.
    pub fn fail_delete_of(&self, cache: &str) {
      *self.fail_delete_of.lock().unwrap() = Some(cache.to_string());
    }
  }

  impl CacheStore for FailingCacheStore {
    fn put(&self, cache: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()> {
      if self.fail_writes.load(Ordering::SeqCst) {
        return Err(eyre!("disk full"));
      }
      self.inner.put(cache, key, snapshot)
    }

    fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
      self.inner.get(cache, key)
    }

    fn get_any(&self, key: &str) -> Result<Option<CachedResponse>> {
      self.inner.get_any(key)
    }

    fn list_generations(&self) -> Result<Vec<String>> {
      self.inner.list_generations()
    }

    fn delete_generation(&self, cache: &str) -> Result<usize> {
      if self.fail_delete_of.lock().unwrap().as_deref() == Some(cache) {
        return Err(eyre!("database is locked"));
      }
      self.inner.delete_generation(cache)
    }
  }
}
