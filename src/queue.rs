//! Durable queue for scans captured while offline.
//!
//! Records arrive through the gateway's enqueue endpoint, are owned by the
//! store until the server acknowledges them, then deleted by identifier.
//! They are never mutated in place.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// One unit of user data captured while disconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
  /// Client-assigned unique identifier, also the deletion key.
  pub id: i64,
  /// The scan payload as the application produced it.
  pub payload: serde_json::Value,
  /// When the record was captured. Defaults to enqueue time when the
  /// client leaves it out.
  #[serde(default = "Utc::now")]
  pub created_at: DateTime<Utc>,
}

/// Durable storage contract for offline records:
/// create, read-all, delete-by-identifier.
pub trait QueueStore: Send + Sync {
  fn create(&self, record: &OfflineRecord) -> Result<()>;
  fn read_all(&self) -> Result<Vec<OfflineRecord>>;
  fn delete(&self, id: i64) -> Result<()>;
}

/// SQLite-backed queue store.
pub struct SqliteQueueStore {
  conn: Mutex<Connection>,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_scans (
    id INTEGER PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

impl SqliteQueueStore {
  /// Open or create the queue store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

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
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

impl QueueStore for SqliteQueueStore {
  fn create(&self, record: &OfflineRecord) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let payload = serde_json::to_string(&record.payload)
      .map_err(|e| eyre!("Failed to serialize record payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO offline_scans (id, payload, created_at) VALUES (?, ?, ?)",
        params![record.id, payload, record.created_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store offline record {}: {}", record.id, e))?;

    Ok(())
  }

  fn read_all(&self) -> Result<Vec<OfflineRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, payload, created_at FROM offline_scans ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(i64, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to read offline records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (id, payload, created_at) in rows {
      let payload = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Failed to parse payload of record {}: {}", id, e))?;
      let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| eyre!("Failed to parse created_at of record {}: {}", id, e))?
        .with_timezone(&Utc);
      records.push(OfflineRecord {
        id,
        payload,
        created_at,
      });
    }

    Ok(records)
  }

  fn delete(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Deleting an already-deleted id is a no-op, which is what makes the
    // sync retry safe.
    conn
      .execute("DELETE FROM offline_scans WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete offline record {}: {}", id, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id: i64) -> OfflineRecord {
    OfflineRecord {
      id,
      payload: serde_json::json!({ "code": format!("SCAN-{}", id) }),
      created_at: Utc::now(),
    }
  }

  #[test]
  fn test_create_and_read_all_in_id_order() {
    let store = SqliteQueueStore::open_in_memory().unwrap();
    store.create(&record(2)).unwrap();
    store.create(&record(1)).unwrap();

    let records = store.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, 1);
    assert_eq!(records[1].id, 2);
  }

  #[test]
  fn test_delete_by_identifier() {
    let store = SqliteQueueStore::open_in_memory().unwrap();
    store.create(&record(1)).unwrap();
    store.create(&record(2)).unwrap();

    store.delete(1).unwrap();
    let remaining = store.read_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, 2);
  }

  #[test]
  fn test_delete_is_idempotent() {
    let store = SqliteQueueStore::open_in_memory().unwrap();
    store.create(&record(1)).unwrap();

    store.delete(1).unwrap();
    store.delete(1).unwrap();
    assert!(store.read_all().unwrap().is_empty());
  }

  #[test]
  fn test_payload_roundtrip() {
    let store = SqliteQueueStore::open_in_memory().unwrap();
    let rec = record(7);
    store.create(&rec).unwrap();

    let records = store.read_all().unwrap();
    assert_eq!(records[0].payload, rec.payload);
  }
}
