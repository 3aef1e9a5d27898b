//! SQLite-backed staging store for background records.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::DbError;

use super::record::{StagedEntry, StagedRecord};
use super::RecordSink;

/// Handle to the staging database.
///
/// The database is identified by a fixed name and schema version; the name
/// becomes the file name and the version is kept in `PRAGMA user_version`.
pub struct StagingStore {
  conn: Mutex<Connection>,
  path: PathBuf,
}

impl StagingStore {
  /// Open or create `<dir>/<name>.db`, upgrading the schema to `version`.
  pub fn open(dir: &Path, name: &str, version: u32) -> Result<Self, DbError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.db", name));

    let conn = Connection::open(&path).map_err(|source| DbError::Open {
      path: path.display().to_string(),
      source,
    })?;

    Self::with_connection(conn, path, version)
  }

  #[cfg(test)]
  pub fn open_in_memory(version: u32) -> Result<Self, DbError> {
    let conn = Connection::open_in_memory().map_err(|source| DbError::Open {
      path: ":memory:".into(),
      source,
    })?;
    Self::with_connection(conn, PathBuf::from(":memory:"), version)
  }

  fn with_connection(conn: Connection, path: PathBuf, version: u32) -> Result<Self, DbError> {
    let store = Self {
      conn: Mutex::new(conn),
      path,
    };
    store.run_migrations(version)?;
    Ok(store)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
    self.conn.lock().map_err(|_| DbError::Poisoned)
  }

  /// Create the record table if it is missing. Existing rows and the key
  /// sequence are left untouched.
  fn run_migrations(&self, version: u32) -> Result<(), DbError> {
    let conn = self.lock()?;
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current > version {
      return Err(DbError::Version {
        found: current,
        requested: version,
      });
    }

    conn.execute_batch(STAGING_SCHEMA)?;

    if current < version {
      conn.pragma_update(None, "user_version", version)?;
      info!(path = %self.path.display(), from = current, to = version, "upgraded staging schema");
    }

    Ok(())
  }

  /// Every staged record in key order.
  pub fn records(&self) -> Result<Vec<StagedEntry>, DbError> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT key, type, timestamp, geofence FROM background_ritase ORDER BY key")?;

    let entries = stmt
      .query_map([], |row| {
        Ok(StagedEntry {
          key: row.get(0)?,
          record: StagedRecord {
            kind: row.get(1)?,
            timestamp: row.get(2)?,
            geofence: row.get(3)?,
          },
        })
      })?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
  }

  /// Remove a record after the consumer has uploaded it.
  pub fn delete(&self, key: i64) -> Result<bool, DbError> {
    let conn = self.lock()?;
    let removed = conn.execute("DELETE FROM background_ritase WHERE key = ?", params![key])?;
    Ok(removed > 0)
  }

  pub fn count(&self) -> Result<usize, DbError> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM background_ritase", [], |row| {
      row.get(0)
    })?;
    Ok(count as usize)
  }
}

impl RecordSink for StagingStore {
  fn append(&self, record: &StagedRecord) -> Result<i64, DbError> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO background_ritase (type, timestamp, geofence) VALUES (?, ?, ?)",
        params![record.kind, record.timestamp, record.geofence],
      )
      .map_err(DbError::Write)?;

    let key = conn.last_insert_rowid();
    debug!(key, geofence = %record.geofence, "staged record");
    Ok(key)
  }
}

/// AUTOINCREMENT keeps keys strictly increasing even after the consumer
/// deletes the newest rows.
const STAGING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS background_ritase (
    key INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    geofence TEXT NOT NULL
);
"#;
