//! FIFO admission algorithm for a single exclusivity key.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExclusiveKey;

/// Result of asking for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The flow holds the key and may run.
    Admitted,
    /// The flow waits; `position` is zero-based within the wait queue.
    Queued { position: usize },
}

/// State of one key: the flow holding it and the flows waiting for it.
///
/// Invariant: `waiting` is empty whenever `holder` is `None`. Every operation
/// below preserves it, so the head of the queue is always the next flow to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub key: ExclusiveKey,
    pub holder: Option<String>,
    pub waiting: VecDeque<String>,
    pub updated_at: DateTime<Utc>,
}

impl LockEntry {
    /// An unheld key with an empty queue.
    pub fn vacant(key: ExclusiveKey) -> Self {
        Self {
            key,
            holder: None,
            waiting: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.holder.is_none() && self.waiting.is_empty()
    }

    /// Request the key for `flow_id`.
    ///
    /// Asking again for a flow that already holds or waits for the key returns
    /// its current standing without enqueueing it a second time.
    pub fn admit(&mut self, flow_id: &str) -> Admission {
        if self.holder.as_deref() == Some(flow_id) {
            return Admission::Admitted;
        }
        if let Some(position) = self.position(flow_id) {
            return Admission::Queued { position };
        }

        self.updated_at = Utc::now();
        if self.holder.is_none() {
            self.holder = Some(flow_id.to_string());
            Admission::Admitted
        } else {
            self.waiting.push_back(flow_id.to_string());
            Admission::Queued {
                position: self.waiting.len() - 1,
            }
        }
    }

    /// Remove `flow_id` from the key, whether it holds it or waits for it.
    ///
    /// When the holder leaves, the head of the queue becomes the holder and is
    /// returned so the caller can start it. Releasing a flow that is not
    /// present is a no-op.
    pub fn release(&mut self, flow_id: &str) -> Option<String> {
        if self.holder.as_deref() == Some(flow_id) {
            self.holder = self.waiting.pop_front();
            self.updated_at = Utc::now();
            return self.holder.clone();
        }
        if let Some(position) = self.position(flow_id) {
            self.waiting.remove(position);
            self.updated_at = Utc::now();
        }
        None
    }

    /// Zero-based position of `flow_id` in the wait queue.
    pub fn position(&self, flow_id: &str) -> Option<usize> {
        self.waiting.iter().position(|id| id == flow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LockEntry {
        LockEntry::vacant(ExclusiveKey::cluster(42))
    }

    #[test]
    fn test_first_flow_is_admitted() {
        let mut lock = entry();
        assert_eq!(lock.admit("a"), Admission::Admitted);
        assert_eq!(lock.holder.as_deref(), Some("a"));
        assert!(lock.waiting.is_empty());
    }

    #[test]
    fn test_second_flow_waits() {
        let mut lock = entry();
        lock.admit("a");
        assert_eq!(lock.admit("b"), Admission::Queued { position: 0 });
        assert_eq!(lock.admit("c"), Admission::Queued { position: 1 });
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut lock = entry();
        lock.admit("a");
        lock.admit("b");

        assert_eq!(lock.admit("a"), Admission::Admitted);
        assert_eq!(lock.admit("b"), Admission::Queued { position: 0 });
        assert_eq!(lock.waiting.len(), 1);
    }

    #[test]
    fn test_release_promotes_in_fifo_order() {
        let mut lock = entry();
        lock.admit("a");
        lock.admit("b");
        lock.admit("c");

        assert_eq!(lock.release("a"), Some("b".to_string()));
        assert_eq!(lock.release("b"), Some("c".to_string()));
        assert_eq!(lock.release("c"), None);
        assert!(lock.is_vacant());
    }

    #[test]
    fn test_release_of_waiting_flow_keeps_holder() {
        let mut lock = entry();
        lock.admit("a");
        lock.admit("b");
        lock.admit("c");

        assert_eq!(lock.release("b"), None);
        assert_eq!(lock.holder.as_deref(), Some("a"));
        assert_eq!(lock.waiting, VecDeque::from(vec!["c".to_string()]));
    }

    #[test]
    fn test_duplicate_release_is_noop() {
        let mut lock = entry();
        lock.admit("a");
        lock.admit("b");

        assert_eq!(lock.release("a"), Some("b".to_string()));
        assert_eq!(lock.release("a"), None);
        assert_eq!(lock.holder.as_deref(), Some("b"));
    }

    #[test]
    fn test_late_arrival_never_overtakes_queue() {
        let mut lock = entry();
        lock.admit("a");
        lock.admit("b");
        lock.release("a");

        // "b" was promoted; a newcomer must queue behind it.
        assert_eq!(lock.admit("z"), Admission::Queued { position: 0 });
        assert_eq!(lock.holder.as_deref(), Some("b"));
    }
}
