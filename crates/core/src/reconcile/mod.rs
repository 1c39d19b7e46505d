//! Reconciliation: re-driving stalled flows and synthesizing repair tickets.

mod config;
mod reconciler;
mod repair;
mod scheduler;

use thiserror::Error;

pub use config::SchedulerConfig;
pub use reconciler::{Reconciler, RepairReport, SYSTEM_CREATOR};
pub use repair::{ChecksumReport, RepairSource, SqliteChecksumReports};
pub use scheduler::{ReconciliationScheduler, ScheduledTask, Task, Trigger};

use crate::orchestrator::OrchestratorError;
use crate::ticket::TicketError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Checksum report store lock poisoned")]
    Poisoned,

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Ticket store error: {0}")]
    TicketStore(#[from] TicketError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
