//! Exclusivity coordinator.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::metrics;

use super::{Admission, ExclusiveError, ExclusiveKey, LockEntry, LockTable};

/// Serializes admission and release of flows per exclusivity key.
///
/// Every read-modify-write of a [`LockEntry`] happens under one mutex, so two
/// flows can never both be admitted for the same key by this process.
pub struct ExclusivityCoordinator {
    table: Arc<dyn LockTable>,
    guard: Mutex<()>,
}

impl ExclusivityCoordinator {
    pub fn new(table: Arc<dyn LockTable>) -> Self {
        Self {
            table,
            guard: Mutex::new(()),
        }
    }

    /// Ask for `key` on behalf of `flow_id`.
    ///
    /// Admits immediately if the key is free, otherwise enqueues at the tail.
    /// Repeating the request does not enqueue the flow twice.
    pub fn acquire(&self, key: &ExclusiveKey, flow_id: &str) -> Result<Admission, ExclusiveError> {
        let _serial = self.guard.lock().map_err(|_| ExclusiveError::Poisoned)?;

        let mut entry = self.table.load(key)?;
        let admission = entry.admit(flow_id);
        self.table.store(&entry)?;

        match admission {
            Admission::Admitted => {
                metrics::FLOW_ADMISSIONS.with_label_values(&["admitted"]).inc();
                info!("Flow {} admitted on {}", flow_id, key);
            }
            Admission::Queued { position } => {
                metrics::FLOW_ADMISSIONS.with_label_values(&["queued"]).inc();
                info!(
                    "Flow {} queued on {} at position {} (held by {})",
                    flow_id,
                    key,
                    position,
                    entry.holder.as_deref().unwrap_or("-")
                );
            }
        }

        Ok(admission)
    }

    /// Remove `flow_id` from `key`, returning the flow promoted to holder, if any.
    ///
    /// Used both when a running flow reaches a terminal status and when a
    /// waiting flow is withdrawn. Releasing an absent flow changes nothing.
    pub fn release(
        &self,
        key: &ExclusiveKey,
        flow_id: &str,
    ) -> Result<Option<String>, ExclusiveError> {
        let _serial = self.guard.lock().map_err(|_| ExclusiveError::Poisoned)?;

        let mut entry = self.table.load(key)?;
        let was_holder = entry.holder.as_deref() == Some(flow_id);
        let promoted = entry.release(flow_id);
        self.table.store(&entry)?;

        if was_holder {
            info!("Flow {} released {}", flow_id, key);
        } else {
            debug!("Flow {} withdrawn from {} wait queue", flow_id, key);
        }
        if let Some(ref next) = promoted {
            metrics::FLOW_ADMISSIONS.with_label_values(&["promoted"]).inc();
            info!("Flow {} promoted to holder of {}", next, key);
        }

        Ok(promoted)
    }

    /// Current holder of `key`.
    pub fn holder(&self, key: &ExclusiveKey) -> Result<Option<String>, ExclusiveError> {
        let _serial = self.guard.lock().map_err(|_| ExclusiveError::Poisoned)?;
        Ok(self.table.load(key)?.holder)
    }

    /// Snapshot of `key`.
    pub fn entry(&self, key: &ExclusiveKey) -> Result<LockEntry, ExclusiveError> {
        let _serial = self.guard.lock().map_err(|_| ExclusiveError::Poisoned)?;
        self.table.load(key)
    }

    /// Snapshot of every held key.
    pub fn entries(&self) -> Result<Vec<LockEntry>, ExclusiveError> {
        let _serial = self.guard.lock().map_err(|_| ExclusiveError::Poisoned)?;
        self.table.entries()
    }
}
