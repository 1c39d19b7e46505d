//! Lock table storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use super::{ExclusiveKey, LockEntry};

/// Errors from lock table storage.
#[derive(Debug, Error)]
pub enum ExclusiveError {
    /// Database error.
    #[error("lock table database error: {0}")]
    Database(String),

    /// Stored entry could not be decoded.
    #[error("corrupt lock entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The coordinator's serialization lock was poisoned.
    #[error("exclusivity coordinator lock poisoned")]
    Poisoned,
}

/// Persistent mapping from key to [`LockEntry`].
///
/// Implementations only load and store entries; callers serialize the
/// read-modify-write cycle (see `ExclusivityCoordinator`).
pub trait LockTable: Send + Sync {
    /// Load the entry for `key`, or a vacant entry if none is stored.
    fn load(&self, key: &ExclusiveKey) -> Result<LockEntry, ExclusiveError>;

    /// Persist `entry`. Vacant entries may be dropped from storage.
    fn store(&self, entry: &LockEntry) -> Result<(), ExclusiveError>;

    /// All non-vacant entries.
    fn entries(&self) -> Result<Vec<LockEntry>, ExclusiveError>;
}

/// Lock table kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLockTable {
    entries: Mutex<HashMap<ExclusiveKey, LockEntry>>,
}

impl InMemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockTable for InMemoryLockTable {
    fn load(&self, key: &ExclusiveKey) -> Result<LockEntry, ExclusiveError> {
        let entries = self.entries.lock().map_err(|_| ExclusiveError::Poisoned)?;
        Ok(entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| LockEntry::vacant(key.clone())))
    }

    fn store(&self, entry: &LockEntry) -> Result<(), ExclusiveError> {
        let mut entries = self.entries.lock().map_err(|_| ExclusiveError::Poisoned)?;
        if entry.is_vacant() {
            entries.remove(&entry.key);
        } else {
            entries.insert(entry.key.clone(), entry.clone());
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<LockEntry>, ExclusiveError> {
        let entries = self.entries.lock().map_err(|_| ExclusiveError::Poisoned)?;
        let mut all: Vec<LockEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}
