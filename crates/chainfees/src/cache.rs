//! Snapshot cache backed by a local SQLite file.
//!
//! A single-table key/value store. Entries carry the unix time they were
//! stored at; freshness is decided on read against a caller-supplied clock so
//! expiry is testable without waiting.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Cache key for the assembled snapshot.
pub const SNAPSHOT_KEY: &str = "defi_chain_data";

/// How long a stored snapshot stays fresh.
pub const SNAPSHOT_TTL: Duration = Duration::hours(24);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SnapshotCache {
    conn: Mutex<Connection>,
}

impl SnapshotCache {
    /// Open or create the cache database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                stored_utc INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))
    }

    /// Value stored under `key` if it is younger than `ttl` as of `now`.
    /// An entry of exactly `ttl` age is already stale.
    pub fn get_fresh(
        &self,
        key: &str,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<Option<String>, CacheError> {
        let conn = self.lock()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, stored_utc FROM snapshots WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((value, stored)) if now.unix_timestamp() - stored < ttl.whole_seconds() => {
                Ok(Some(value))
            }
            Some(_) => {
                debug!(key, "cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &str, value: &str, now: OffsetDateTime) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (key, value, stored_utc) VALUES (?1, ?2, ?3)",
            params![key, value, now.unix_timestamp()],
        )?;
        Ok(())
    }

    pub fn evict(&self, key: &str) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM snapshots WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Cheap connectivity probe for health reporting.
    pub fn ping(&self) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
