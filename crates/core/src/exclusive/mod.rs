//! Resource exclusivity for flows.
//!
//! Flows that touch the same resource (an [`ExclusiveKey`], usually a cluster)
//! never run concurrently. The [`ExclusivityCoordinator`] is the single
//! serialization point: it admits a flow when the key is free and otherwise
//! parks it at the tail of the key's FIFO wait queue. Releasing a key promotes
//! the head of that queue.

mod coordinator;
mod key;
mod lock;
mod sqlite_table;
mod table;

pub use coordinator::ExclusivityCoordinator;
pub use key::ExclusiveKey;
pub use lock::{Admission, LockEntry};
pub use sqlite_table::SqliteLockTable;
pub use table::{ExclusiveError, InMemoryLockTable, LockTable};
