//! Cache storage trait and SQLite implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CacheError;
use crate::net::{RequestKey, Response, ResponseKind};

use super::entry::{CachedEntry, Generation, GenerationState};

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations; which one is current is
/// decided by the caller.
pub trait CacheStorage: Send + Sync {
  /// Replace the contents of `name` with `entries` in a single commit,
  /// recording it in `state`. Nothing is visible if this fails.
  fn commit_generation(
    &self,
    name: &str,
    state: GenerationState,
    entries: Vec<(RequestKey, Response)>,
  ) -> Result<(), CacheError>;

  /// All generation names with their state.
  fn generations(&self) -> Result<Vec<Generation>, CacheError>;

  fn set_state(&self, name: &str, state: GenerationState) -> Result<(), CacheError>;

  /// Delete a generation and every entry in it. Returns false if it did not exist.
  fn delete_generation(&self, name: &str) -> Result<bool, CacheError>;

  fn get_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError>;

  /// Insert or overwrite a single entry, creating the generation if needed.
  fn put_entry(&self, name: &str, key: &RequestKey, response: Response) -> Result<(), CacheError>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, CacheError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
    self.conn.lock().map_err(|_| CacheError::Poisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation (named by cache version)
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, keyed by hashed request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
   (generation, request_hash, method, url, status, kind, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))";

fn insert_entry(
  conn: &Connection,
  name: &str,
  key: &RequestKey,
  response: Response,
) -> Result<(), CacheError> {
  let headers = serde_json::to_string(&response.headers)?;
  let status = response.status;
  let kind = response.kind.as_str();
  let body = response.into_body();
  conn.execute(
    UPSERT_ENTRY,
    params![
      name,
      key.digest(),
      key.method,
      key.url,
      status,
      kind,
      headers,
      body.as_ref()
    ],
  )?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn commit_generation(
    &self,
    name: &str,
    state: GenerationState,
    entries: Vec<(RequestKey, Response)>,
  ) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM cache_entries WHERE generation = ?", params![name])?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_generations (name, state) VALUES (?, ?)",
      params![name, state.as_str()],
    )?;

    for (key, response) in entries {
      insert_entry(&tx, name, &key, response)?;
    }

    tx.commit()?;
    Ok(())
  }

  fn generations(&self) -> Result<Vec<Generation>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT g.name, g.state, COUNT(e.request_hash) FROM cache_generations g
       LEFT JOIN cache_entries e ON e.generation = g.name
       GROUP BY g.name, g.state
       ORDER BY g.created_at, g.name",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(
      rows
        .into_iter()
        .map(|(name, state, entries)| Generation {
          name,
          state: GenerationState::parse(&state).unwrap_or(GenerationState::Installed),
          entries: entries as usize,
        })
        .collect(),
    )
  }

  fn set_state(&self, name: &str, state: GenerationState) -> Result<(), CacheError> {
    let conn = self.lock()?;
    conn.execute(
      "UPDATE cache_generations SET state = ? WHERE name = ?",
      params![state.as_str(), name],
    )?;
    Ok(())
  }

  fn delete_generation(&self, name: &str) -> Result<bool, CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE generation = ?", params![name])?;
    let removed = tx.execute("DELETE FROM cache_generations WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn get_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT status, kind, headers, body, cached_at FROM cache_entries
       WHERE generation = ? AND request_hash = ?",
    )?;

    let row = stmt
      .query_row(params![name, key.digest()], |row| {
        Ok((
          row.get::<_, u16>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, Vec<u8>>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .optional()?;

    let Some((status, kind, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    Ok(Some(CachedEntry {
      key: key.clone(),
      status,
      kind: ResponseKind::parse(&kind),
      headers: serde_json::from_str(&headers)?,
      body: Bytes::from(body),
      cached_at: parse_datetime(&cached_at),
    }))
  }

  fn put_entry(&self, name: &str, key: &RequestKey, response: Response) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name, state) VALUES (?, ?)",
      params![name, GenerationState::Installed.as_str()],
    )?;
    insert_entry(&tx, name, key, response)?;
    tx.commit()?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format, falling back to now.
fn parse_datetime(s: &str) -> DateTime<Utc> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .unwrap_or_else(|_| Utc::now())
}
