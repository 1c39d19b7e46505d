//! SQLite-backed lock table.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{ExclusiveError, ExclusiveKey, LockEntry, LockTable};

/// SQLite-backed lock table.
pub struct SqliteLockTable {
    conn: Mutex<Connection>,
}

impl SqliteLockTable {
    /// Open (or create) the lock table in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, ExclusiveError> {
        let conn = Connection::open(path).map_err(|e| ExclusiveError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory lock table (useful for testing).
    pub fn in_memory() -> Result<Self, ExclusiveError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ExclusiveError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ExclusiveError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exclusive_locks (
                key TEXT PRIMARY KEY,
                holder TEXT,
                waiting TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| ExclusiveError::Database(e.to_string()))
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<(String, Option<String>, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode(
        (key, holder, waiting_json, updated_at): (String, Option<String>, String, String),
    ) -> Result<LockEntry, ExclusiveError> {
        let waiting: VecDeque<String> =
            serde_json::from_str(&waiting_json).map_err(|e| ExclusiveError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(LockEntry {
            key: ExclusiveKey::new(key),
            holder,
            waiting,
            updated_at,
        })
    }
}

impl LockTable for SqliteLockTable {
    fn load(&self, key: &ExclusiveKey) -> Result<LockEntry, ExclusiveError> {
        let conn = self.conn.lock().map_err(|_| ExclusiveError::Poisoned)?;

        let result = conn.query_row(
            "SELECT key, holder, waiting, updated_at FROM exclusive_locks WHERE key = ?",
            params![key.as_str()],
            Self::row_to_entry,
        );

        match result {
            Ok(raw) => Self::decode(raw),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(LockEntry::vacant(key.clone())),
            Err(e) => Err(ExclusiveError::Database(e.to_string())),
        }
    }

    fn store(&self, entry: &LockEntry) -> Result<(), ExclusiveError> {
        let conn = self.conn.lock().map_err(|_| ExclusiveError::Poisoned)?;

        if entry.is_vacant() {
            conn.execute(
                "DELETE FROM exclusive_locks WHERE key = ?",
                params![entry.key.as_str()],
            )
            .map_err(|e| ExclusiveError::Database(e.to_string()))?;
            return Ok(());
        }

        let waiting_json = serde_json::to_string(&entry.waiting).map_err(|e| {
            ExclusiveError::Corrupt {
                key: entry.key.to_string(),
                reason: e.to_string(),
            }
        })?;

        conn.execute(
            "INSERT INTO exclusive_locks (key, holder, waiting, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET holder = excluded.holder, waiting = excluded.waiting, updated_at = excluded.updated_at",
            params![
                entry.key.as_str(),
                entry.holder,
                waiting_json,
                entry.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| ExclusiveError::Database(e.to_string()))?;

        Ok(())
    }

    fn entries(&self) -> Result<Vec<LockEntry>, ExclusiveError> {
        let conn = self.conn.lock().map_err(|_| ExclusiveError::Poisoned)?;

        let mut stmt = conn
            .prepare("SELECT key, holder, waiting, updated_at FROM exclusive_locks ORDER BY key")
            .map_err(|e| ExclusiveError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_entry)
            .map_err(|e| ExclusiveError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| ExclusiveError::Database(e.to_string()))?;
            entries.push(Self::decode(raw)?);
        }
        Ok(entries)
    }
}
