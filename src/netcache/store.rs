//! Named response partitions: trait, in-memory and SQLite implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::types::NetResponse;

/// Persistent request key → response maps, grouped in named partitions.
///
/// Each call is atomic on its own; concurrent fetch handlers may read and
/// write the same keys.
pub trait ResponseStore: Send + Sync {
  /// Create a partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// Names of every existing partition.
  fn partitions(&self) -> Result<Vec<String>>;

  fn get(&self, partition: &str, key: &str) -> Result<Option<NetResponse>>;

  /// Store a response, creating the partition when needed.
  fn put(&self, partition: &str, key: &str, response: &NetResponse) -> Result<()>;

  /// Drop a partition and everything in it. Returns whether it existed.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Drop every partition. Returns how many existed.
  fn clear(&self) -> Result<usize> {
    let partitions = self.partitions()?;
    for partition in &partitions {
      self.delete_partition(partition)?;
    }
    Ok(partitions.len())
  }
}

/// Response partitions held in memory.
#[derive(Default)]
pub struct MemoryResponseStore {
  partitions: RwLock<BTreeMap<String, HashMap<String, NetResponse>>>,
}

impl MemoryResponseStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ResponseStore for MemoryResponseStore {
  fn open(&self, partition: &str) -> Result<()> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions.entry(partition.to_string()).or_default();
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.keys().cloned().collect())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<NetResponse>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.get(partition).and_then(|p| p.get(key)).cloned())
  }

  fn put(&self, partition: &str, key: &str, response: &NetResponse) -> Result<()> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions
      .entry(partition.to_string())
      .or_default()
      .insert(key.to_string(), response.clone());
    Ok(())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.remove(partition).is_some())
  }
}

/// SQLite-backed response partitions.
pub struct SqliteResponseStore {
  conn: Mutex<Connection>,
}

const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cached_responses (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    response BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, request_key),
    FOREIGN KEY (partition) REFERENCES cache_partitions(name) ON DELETE CASCADE
);
"#;

impl SqliteResponseStore {
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open response cache at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;
    conn
      .execute_batch(RESPONSE_SCHEMA)
      .map_err(|e| eyre!("Failed to run response cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl ResponseStore for SqliteResponseStore {
  fn open(&self, partition: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;
    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(names)
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<NetResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT response FROM cached_responses WHERE partition = ? AND request_key = ?",
        params![partition, key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached response: {}", e))?;

    match data {
      Some(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| eyre!("Failed to deserialize cached response: {}", e)),
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &str, response: &NetResponse) -> Result<()> {
    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cached_responses (partition, request_key, response, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![partition, key, data],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;
    Ok(())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let removed = conn
      .execute(
        "DELETE FROM cache_partitions WHERE name = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;
    Ok(removed > 0)
  }
}
